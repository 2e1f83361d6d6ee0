//! NDJSON codec for message serialization
//!
//! Shared encoding/decoding logic for the line-delimited JSON protocol used
//! for socket communication.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::socket::SocketError;

/// Encode a client message into NDJSON format (JSON + newline)
pub fn encode_client_message(message: &ClientMessage) -> Result<String, SocketError> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    Ok(json)
}

/// Encode a server message into NDJSON format
pub fn encode_server_message(message: &ServerMessage) -> Result<String, SocketError> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    Ok(json)
}

/// Decode a line of JSON into a ClientMessage
pub fn decode_client_message(line: &str) -> Result<ClientMessage, SocketError> {
    let message: ClientMessage = serde_json::from_str(line.trim())?;
    Ok(message)
}

/// Decode a line of JSON into a ServerMessage
pub fn decode_server_message(line: &str) -> Result<ServerMessage, SocketError> {
    let message: ServerMessage = serde_json::from_str(line.trim())?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::Severity;
    use crate::protocol::State;

    #[test]
    fn test_encode_client_message() {
        let message = ClientMessage::new_status();
        let encoded = encode_client_message(&message).unwrap();
        assert!(encoded.ends_with('\n'));
        assert!(encoded.contains("\"type\":\"status\""));
    }

    #[test]
    fn test_set_webhook_roundtrip() {
        let message = ClientMessage::new_set_webhook("https://example.com/hook".to_string());
        let encoded = encode_client_message(&message).unwrap();

        let decoded = decode_client_message(encoded.trim_end()).unwrap();
        match decoded {
            ClientMessage::SetWebhook { url, .. } => {
                assert_eq!(url, "https://example.com/hook");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_set_auto_send_roundtrip() {
        let message = ClientMessage::new_set_auto_send(true);
        let encoded = encode_client_message(&message).unwrap();

        let decoded = decode_client_message(encoded.trim_end()).unwrap();
        match decoded {
            ClientMessage::SetAutoSend { enabled, .. } => assert!(enabled),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_server_message_status_event_roundtrip() {
        let message =
            ServerMessage::new_status_event(State::Listening, 0.42, "hello ".to_string(), 1000);
        let encoded = encode_server_message(&message).unwrap();
        assert!(encoded.contains("\"type\":\"status_event\""));

        let decoded = decode_server_message(encoded.trim()).unwrap();
        match decoded {
            ServerMessage::StatusEvent { state, text, .. } => {
                assert_eq!(state, State::Listening);
                assert_eq!(text, "hello ");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_server_message_notice_roundtrip() {
        let message = ServerMessage::new_notice(Severity::Error, "webhook delivery failed".into());
        let encoded = encode_server_message(&message).unwrap();

        let decoded = decode_server_message(encoded.trim()).unwrap();
        assert!(matches!(
            decoded,
            ServerMessage::Notice {
                severity: Severity::Error,
                ..
            }
        ));
    }
}
