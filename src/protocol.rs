use crate::notice::Severity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Listening,
    Error,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Idle => "Ready",
            State::Listening => "Listening",
            State::Error => "Error",
        }
    }
}

/// Messages sent from clients to the server
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a recognition session
    Start { id: Uuid },
    /// Stop the active recognition session
    Stop { id: Uuid },
    /// Reset the accumulated text to empty
    Clear { id: Uuid },
    /// Deliver the accumulated text to the configured webhook now
    Send { id: Uuid },
    /// Set the webhook destination URL
    SetWebhook { id: Uuid, url: String },
    /// Enable or disable automatic delivery of transcribed text
    SetAutoSend { id: Uuid, enabled: bool },
    /// Request server status
    Status { id: Uuid },
    /// Subscribe to server events
    Subscribe { id: Uuid },
}

impl ClientMessage {
    /// Create a new Start request
    pub fn new_start() -> Self {
        ClientMessage::Start { id: Uuid::new_v4() }
    }

    /// Create a new Stop request
    pub fn new_stop() -> Self {
        ClientMessage::Stop { id: Uuid::new_v4() }
    }

    /// Create a new Clear request
    pub fn new_clear() -> Self {
        ClientMessage::Clear { id: Uuid::new_v4() }
    }

    /// Create a new manual Send request
    pub fn new_send() -> Self {
        ClientMessage::Send { id: Uuid::new_v4() }
    }

    /// Create a new SetWebhook request
    pub fn new_set_webhook(url: String) -> Self {
        ClientMessage::SetWebhook {
            id: Uuid::new_v4(),
            url,
        }
    }

    /// Create a new SetAutoSend request
    pub fn new_set_auto_send(enabled: bool) -> Self {
        ClientMessage::SetAutoSend {
            id: Uuid::new_v4(),
            enabled,
        }
    }

    /// Create a new Status request
    pub fn new_status() -> Self {
        ClientMessage::Status { id: Uuid::new_v4() }
    }

    /// Create a new Subscribe request
    pub fn new_subscribe() -> Self {
        ClientMessage::Subscribe { id: Uuid::new_v4() }
    }
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Request completed
    Ack { id: Uuid },
    /// Error response
    Error { id: Uuid, error: String },
    /// Status information (in response to status request)
    Status {
        id: Uuid,
        service_running: bool,
        listening: bool,
        auto_send_enabled: bool,
        webhook_configured: bool,
        uptime_seconds: u64,
        text_chars: usize,
    },
    /// Subscription confirmation
    Subscribed { id: Uuid },
    /// State broadcast (sent to subscribers on change and on heartbeat)
    StatusEvent {
        state: State,
        level: f32,
        text: String,
        ts: u64,
        #[serde(default = "default_version")]
        ver: u32,
    },
    /// Transient user-visible message broadcast
    Notice { severity: Severity, message: String },
}

fn default_version() -> u32 {
    1
}

impl ServerMessage {
    /// Create an Ack response
    pub fn new_ack(id: Uuid) -> Self {
        ServerMessage::Ack { id }
    }

    /// Create an Error response
    pub fn new_error(id: Uuid, error: impl Into<String>) -> Self {
        ServerMessage::Error {
            id,
            error: error.into(),
        }
    }

    /// Create a Status response
    pub fn new_status(
        id: Uuid,
        listening: bool,
        auto_send_enabled: bool,
        webhook_configured: bool,
        uptime_seconds: u64,
        text_chars: usize,
    ) -> Self {
        ServerMessage::Status {
            id,
            service_running: true,
            listening,
            auto_send_enabled,
            webhook_configured,
            uptime_seconds,
            text_chars,
        }
    }

    /// Create a Subscribed response
    pub fn new_subscribed(id: Uuid) -> Self {
        ServerMessage::Subscribed { id }
    }

    /// Create a StatusEvent broadcast
    pub fn new_status_event(state: State, level: f32, text: String, ts: u64) -> Self {
        ServerMessage::StatusEvent {
            state,
            level,
            text,
            ts,
            ver: 1,
        }
    }

    /// Create a Notice broadcast
    pub fn new_notice(severity: Severity, message: String) -> Self {
        ServerMessage::Notice { severity, message }
    }
}
