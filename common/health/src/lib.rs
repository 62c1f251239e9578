use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

/// Liveness reporting for the long-running parts of a service.
///
/// Every consumer loop, and the Kafka client statistics callback that proves
/// librdkafka's own threads are still alive, registers a component here and
/// must keep reporting before its deadline. The process is live only while
/// every registered component is live:
///   - a component that never reported, or reported unhealthy, fails the check
///   - a component whose deadline passed is marked stalled and fails the check
///   - an empty registry fails the check, nothing has started yet
///
/// Reporting is synchronous so it can be called from librdkafka callback
/// threads as well as from async tasks.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        let code = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (code, body).into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered but not reported yet
    Starting,
    /// Live until the given instant
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Derived when a HealthyUntil deadline has passed
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Must be called more often than the deadline given at registration.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            Err(_) => warn!(
                component = self.component,
                "poisoned health registry lock, dropping status report"
            ),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a component in `Starting` state. Registering the same name
    /// twice hands out a second handle to the same slot.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Combined status of all registered components. Usable as an axum handler
    /// through a closure.
    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let components = match self.components.read() {
            Ok(map) => map.clone(),
            Err(_) => {
                warn!("{} health registry lock poisoned", self.name);
                return HealthStatus::default();
            }
        };

        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };
        for (name, component) in components {
            let effective = match component {
                ComponentStatus::HealthyUntil(until) if until > now => component,
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other,
            };
            if !matches!(effective, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name, effective);
        }

        if status.healthy {
            info!("{} health check ok", self.name);
        } else {
            warn!("{} health check failed: {:?}", self.name, status.components);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Sub;

    #[test]
    fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn component_goes_through_its_states() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("consumer:events", Duration::seconds(30));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("consumer:events"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        handle.report_status(ComponentStatus::Unhealthy);
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("consumer:events"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[test]
    fn passed_deadline_is_reported_as_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("rdkafka", Duration::seconds(30));
        handle.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().sub(Duration::seconds(1)),
        ));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("rdkafka"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[test]
    fn every_component_must_be_live() {
        let registry = HealthRegistry::new("liveness");
        let one = registry.register("one", Duration::seconds(30));
        let two = registry.register("two", Duration::seconds(30));

        one.report_healthy();
        assert!(!registry.get_status().healthy);

        two.report_healthy();
        assert!(registry.get_status().healthy);

        one.report_status(ComponentStatus::Unhealthy);
        assert!(!registry.get_status().healthy);

        one.report_healthy();
        assert!(registry.get_status().healthy);
    }

    #[test]
    fn status_maps_to_http_code() {
        let nok = HealthStatus::default().into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: Default::default(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
