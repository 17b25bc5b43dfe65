//! Fire-and-forget notifications.

use tracing::info;

use crate::types::NotificationEvent;

/// Notification channel. Implementations must not block and swallow
/// their own delivery errors.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: NotificationEvent, payload: serde_json::Value);
}

/// Notifier that writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: NotificationEvent, payload: serde_json::Value) {
        info!(event = event.as_str(), %payload, "notification");
    }
}
