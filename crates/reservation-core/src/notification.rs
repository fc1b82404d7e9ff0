//! Fire-and-forget lifecycle notifications.
//!
//! Shaped like an audit-log sink, but with inverted failure semantics:
//! audit logging is fail-closed (a write that can't be
//! recorded aborts the request), while lease/reservation notifications are
//! fail-open — a subscriber outage must never block or fail an
//! orchestrator operation.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::NotificationError;

/// A lifecycle event published to interested subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Routing key, e.g. `"lease.create"`, `"lease.event.start"`.
    pub topic: String,
    pub payload: serde_json::Value,
}

/// A destination notifications are published to.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// A short name for this sink, used in error logs.
    fn name(&self) -> &str;

    /// Publish a notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if the sink could not accept the
    /// notification. Callers (always [`NotificationEmitter`]) log and
    /// discard this error rather than propagating it.
    async fn publish(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// A sink that logs notifications via `tracing` rather than delivering
/// them anywhere. The default sink, suitable for deployments that don't
/// wire up a message bus.
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    fn name(&self) -> &str {
        "logging"
    }

    async fn publish(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::info!(
            topic = %notification.topic,
            payload = %notification.payload,
            "lease notification"
        );
        Ok(())
    }
}

/// Publishes notifications to one or more sinks, swallowing failures.
///
/// This is the only public entry point lease lifecycle code should use to
/// emit notifications — it is intentionally infallible
/// from the caller's point of view.
pub struct NotificationEmitter {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl std::fmt::Debug for NotificationEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationEmitter")
            .field("sinks", &self.sinks.iter().map(NotificationSink::name).collect::<Vec<_>>())
            .finish()
    }
}

impl NotificationEmitter {
    /// Create an emitter that publishes to the given sinks in order.
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// Publish `topic`/`payload` to every configured sink.
    ///
    /// Never returns an error: a sink failure is logged at `warn` and the
    /// remaining sinks still run.
    pub async fn emit(&self, topic: impl Into<String>, payload: serde_json::Value) {
        let notification = Notification {
            topic: topic.into(),
            payload,
        };

        for sink in &self.sinks {
            if let Err(err) = sink.publish(&notification).await {
                tracing::warn!(
                    sink = sink.name(),
                    topic = %notification.topic,
                    error = %err,
                    "notification delivery failed, continuing"
                );
            }
        }
    }
}
