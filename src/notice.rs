//! User-facing notices
//!
//! Components report transient, user-visible outcomes (errors, informational
//! messages) through a `NoticeSender` instead of printing or panicking. The
//! daemon forwards notices to every subscribed client.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

/// A transient user-visible message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

/// Handle for emitting notices from any component
///
/// Cloneable and cheap; dropping every clone closes the stream.
#[derive(Clone)]
pub struct NoticeSender {
    tx: mpsc::UnboundedSender<Notice>,
}

impl NoticeSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Severity::Info, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Severity::Error, message.into());
    }

    fn emit(&self, severity: Severity, message: String) {
        // Receiver gone means the daemon is shutting down; nothing to surface to
        let _ = self.tx.send(Notice { severity, message });
    }
}
