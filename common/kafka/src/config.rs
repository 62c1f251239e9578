use std::fmt;
use std::str::FromStr;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

use crate::codec::PayloadFormat;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    // Comma separated bootstrap servers, required at setup time
    #[envconfig(default = "")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "60000")]
    pub kafka_session_timeout_ms: u32,

    #[envconfig(default = "5000")]
    pub kafka_heartbeat_interval_ms: u32,

    #[envconfig(default = "300000")]
    pub kafka_max_poll_interval_ms: u32,

    #[envconfig(default = "10000")]
    pub kafka_statistics_interval_ms: u32,

    // Only sets client.id. Members stay dynamic so closing a consumer leaves the group
    pub kafka_client_id: Option<String>,
}

/// Defaults for subscriptions built from configuration rather than code.
#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerDefaults {
    #[envconfig(default = "default")]
    pub kafka_consumer_group: String,

    // We default to "earliest" for this, but if you're bringing up a new service, you probably want "latest"
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: OffsetReset,

    #[envconfig(default = "500")]
    pub kafka_consumer_max_chunk_size: usize,

    #[envconfig(default = "json")]
    pub kafka_consumer_payload_format: PayloadFormat,
}

/// Where a consumer group starts when it has no committed offset yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidOffsetReset(pub String);

impl fmt::Display for InvalidOffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid offset reset policy: {}", self.0)
    }
}

impl FromStr for OffsetReset {
    type Err = InvalidOffsetReset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(InvalidOffsetReset(other.to_owned())),
        }
    }
}

/// Builds the librdkafka configuration for a manually committing group
/// consumer with cooperative rebalancing.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            // offsets only move forward through explicit commits after a batch was handled
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("partition.assignment.strategy", "cooperative-sticky");

        Self { config }
    }

    pub fn from_kafka_config(kafka: &KafkaConfig, group_id: &str) -> Self {
        Self::new(&kafka.kafka_hosts, group_id)
            .with_tls(kafka.kafka_tls)
            .with_session_timeout_ms(kafka.kafka_session_timeout_ms)
            .with_heartbeat_interval_ms(kafka.kafka_heartbeat_interval_ms)
            .with_max_poll_interval_ms(kafka.kafka_max_poll_interval_ms)
            .with_statistics_interval_ms(kafka.kafka_statistics_interval_ms)
            .with_client_id(kafka.kafka_client_id.as_deref())
    }

    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    pub fn with_offset_reset(mut self, policy: OffsetReset) -> Self {
        self.config.set("auto.offset.reset", policy.as_str());
        self
    }

    pub fn with_session_timeout_ms(mut self, ms: u32) -> Self {
        self.config.set("session.timeout.ms", ms.to_string());
        self
    }

    /// Should stay around a third of the session timeout.
    pub fn with_heartbeat_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("heartbeat.interval.ms", ms.to_string());
        self
    }

    /// Upper bound on how long a handler may run before the consumer is
    /// considered gone and its partitions are reassigned.
    pub fn with_max_poll_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("max.poll.interval.ms", ms.to_string());
        self
    }

    pub fn with_statistics_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("statistics.interval.ms", ms.to_string());
        self
    }

    pub fn with_client_id(mut self, client_id: Option<&str>) -> Self {
        if let Some(client_id) = client_id {
            self.config.set("client.id", client_id);
        }
        self
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_kafka_config() -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: "kafka-0:9092,kafka-1:9092".to_string(),
            kafka_tls: false,
            kafka_session_timeout_ms: 45000,
            kafka_heartbeat_interval_ms: 15000,
            kafka_max_poll_interval_ms: 300000,
            kafka_statistics_interval_ms: 10000,
            kafka_client_id: None,
        }
    }

    #[test]
    fn group_consumer_never_auto_commits() {
        let config = ConsumerConfigBuilder::from_kafka_config(&test_kafka_config(), "bazaar")
            .with_offset_reset(OffsetReset::Latest)
            .build();

        assert_eq!(config.get("bootstrap.servers"), Some("kafka-0:9092,kafka-1:9092"));
        assert_eq!(config.get("group.id"), Some("bazaar"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(
            config.get("partition.assignment.strategy"),
            Some("cooperative-sticky")
        );
        assert_eq!(config.get("session.timeout.ms"), Some("45000"));
        assert_eq!(config.get("security.protocol"), None);
        assert_eq!(config.get("group.instance.id"), None);
    }

    #[test]
    fn client_id_never_turns_on_static_membership() {
        let mut kafka = test_kafka_config();
        kafka.kafka_tls = true;
        kafka.kafka_client_id = Some("indexer-0".to_string());

        let config = ConsumerConfigBuilder::from_kafka_config(&kafka, "bazaar").build();
        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(config.get("client.id"), Some("indexer-0"));
        assert_eq!(config.get("group.instance.id"), None);
    }

    #[test]
    fn offset_reset_parses_case_insensitively() {
        assert_eq!("Earliest".parse(), Ok(OffsetReset::Earliest));
        assert_eq!("latest".parse(), Ok(OffsetReset::Latest));
        assert!("beginning".parse::<OffsetReset>().is_err());
    }
}
