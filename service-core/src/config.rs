use std::net::SocketAddr;
use std::str::FromStr;
use std::time;

use common_kafka::{ConsumerDefaults, KafkaConfig};
use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(default = "service-core")]
    pub service_name: String,

    // HS256 key for our own tokens, must be set
    pub jwt_secret: NonEmptyString,

    #[envconfig(default = "service-core")]
    pub jwt_issuer: String,

    #[envconfig(default = "30")]
    pub jwt_validity_days: i64,

    // HS256 key of the identity provider whose tokens are exchanged at login
    pub identity_provider_secret: NonEmptyString,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "service-core")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub otel_log_level: Level,

    // Comma separated topics for the batch logging consumer, disabled when unset
    pub consumer_topics: Option<String>,

    #[envconfig(default = "30000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerDefaults,
}

impl Config {
    pub fn consumer_topics(&self) -> Vec<String> {
        self.consumer_topics
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_only_secrets_are_set() {
        let config = Config::init_from_hashmap(&env(&[
            ("JWT_SECRET", "not-so-secret"),
            ("IDENTITY_PROVIDER_SECRET", "provider-secret"),
        ]))
        .unwrap();

        assert_eq!(config.address.to_string(), "127.0.0.1:3000");
        assert_eq!(config.jwt_validity_days, 30);
        assert_eq!(config.shutdown_timeout.0, time::Duration::from_secs(30));
        assert_eq!(config.consumer.kafka_consumer_group, "default");
        assert_eq!(config.consumer.kafka_consumer_max_chunk_size, 500);
        assert!(config.kafka.kafka_hosts.is_empty());
        assert!(config.consumer_topics().is_empty());
    }

    #[test]
    fn empty_jwt_secret_is_rejected() {
        let result = Config::init_from_hashmap(&env(&[
            ("JWT_SECRET", ""),
            ("IDENTITY_PROVIDER_SECRET", "provider-secret"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn consumer_topics_are_split_and_trimmed() {
        let config = Config::init_from_hashmap(&env(&[
            ("JWT_SECRET", "a"),
            ("IDENTITY_PROVIDER_SECRET", "b"),
            ("CONSUMER_TOPICS", "listings, bids,,"),
        ]))
        .unwrap();
        assert_eq!(config.consumer_topics(), vec!["listings", "bids"]);
    }
}
