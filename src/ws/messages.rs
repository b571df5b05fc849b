//! Control messages on the live-update channel.

use serde::{Deserialize, Serialize};

/// Commands a dashboard client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Request a fresh snapshot of the user's alarm state.
    Snapshot,
    /// Application-level keepalive, answered with `pong`.
    Ping,
}

/// Control frames the server sends outside the live-event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerNotice {
    /// Reply to a client `ping`.
    Pong,
    /// The last client message could not be understood.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        let Ok(cmd) = serde_json::from_str::<ClientCommand>(r#"{"type":"snapshot"}"#) else {
            panic!("snapshot command should parse");
        };
        assert_eq!(cmd, ClientCommand::Snapshot);
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn notice_shapes() {
        let Ok(pong) = serde_json::to_value(ServerNotice::Pong) else {
            panic!("serialize pong");
        };
        assert_eq!(pong, serde_json::json!({"type": "pong"}));
        let Ok(err) = serde_json::to_value(ServerNotice::Error {
            message: "bad".into(),
        }) else {
            panic!("serialize error");
        };
        assert_eq!(err, serde_json::json!({"type": "error", "message": "bad"}));
    }
}
