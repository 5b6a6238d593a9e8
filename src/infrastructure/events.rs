//! Publishes domain events to NATS when a server is configured.

use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;

#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn disabled() -> Self { Self { nats: None } }

    /// Connect to `url` if given. A failed connection leaves publishing disabled.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::disabled() };
        match async_nats::connect(url).await {
            Ok(client) => {
                info!(%url, "connected to NATS");
                Self { nats: Some(client) }
            }
            Err(e) => {
                warn!(%url, error = %e, "NATS unavailable, domain events will only be logged");
                Self::disabled()
            }
        }
    }

    /// Fire and forget: publishing problems are logged, never returned.
    pub async fn publish(&self, event: DomainEvent) {
        let subject = event.subject();
        let Some(client) = &self.nats else {
            debug!(subject, ?event, "domain event");
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject, error = %e, "could not serialise domain event");
                return;
            }
        };
        if let Err(e) = client.publish(subject.to_string(), payload.into()).await {
            warn!(subject, error = %e, "failed to publish domain event");
        }
    }
}
