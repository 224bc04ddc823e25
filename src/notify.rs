use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NotifyConfig;

/// Structured event for the audit/notification sink: one per audit record,
/// plus breaker transitions and rollback-failure alerts.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Decision {
        cycle_id: u64,
        channel_id: String,
        decision: String,
        validation: String,
        apply_result: String,
        justification: String,
        timestamp: f64,
    },
    BreakerTripped {
        failures: usize,
        timestamp: f64,
    },
    BreakerReset {
        timestamp: f64,
    },
    /// A channel's live policy may be in an unknown state; needs an operator.
    RollbackFailed {
        channel_id: String,
        reason: String,
        timestamp: f64,
    },
}

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

fn log_event(event: &Event) {
    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("unserializable: {}", e));
    match event {
        Event::RollbackFailed { .. } => error!("ALERT {}", json),
        Event::BreakerTripped { .. } => warn!("{}", json),
        _ => info!("{}", json),
    }
}

/// Log-only sink.
pub struct LogSink;

#[async_trait::async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: Event) {
        log_event(&event);
    }
}

/// Logs every event and POSTs it to a webhook. Delivery failures are logged
/// and never propagated into the cycle.
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(config: &NotifyConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: config.webhook_url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl EventSink for WebhookSink {
    async fn emit(&self, event: Event) {
        log_event(&event);
        let result = self.http.post(&self.url).json(&event).send().await;
        match result.and_then(|r| r.error_for_status()) {
            Ok(_) => {}
            Err(e) => warn!("Webhook delivery failed: {}", e),
        }
    }
}

pub fn from_config(config: &NotifyConfig) -> anyhow::Result<Arc<dyn EventSink>> {
    if config.webhook_url.is_empty() {
        Ok(Arc::new(LogSink))
    } else {
        Ok(Arc::new(WebhookSink::new(config)?))
    }
}

// ---------------------------------------------------------------------------
// Recording sink for integration testing
// ---------------------------------------------------------------------------

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn count_decisions(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Decision { .. }))
                .count()
        }
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = Event::BreakerTripped {
            failures: 3,
            timestamp: 1000.0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"breaker_tripped""#));
        assert!(json.contains(r#""failures":3"#));
    }

    #[test]
    fn test_from_config_picks_sink() {
        let mut config = NotifyConfig::default();
        assert!(from_config(&config).is_ok());
        config.webhook_url = "http://localhost:9000/events".to_string();
        assert!(from_config(&config).is_ok());
    }
}
