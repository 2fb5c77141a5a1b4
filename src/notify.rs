use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::logging::OperationLogger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Notification {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Fire-and-forget user notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn notify(&self, _notification: &Notification) -> Result<(), String> {
        Ok(())
    }
}

/// Deliver a notification, downgrading a sink failure to a warning.
pub(crate) fn deliver(sink: &dyn NotificationSink, logger: &dyn OperationLogger, notification: Notification) {
    if let Err(err) = sink.notify(&notification) {
        logger.warn(
            "Notification delivery failed",
            json!({ "title": notification.title, "error": err }),
        );
    }
}
