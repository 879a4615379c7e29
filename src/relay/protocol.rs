//! Relay wire messages
//!
//! The relay sends one JSON object per WebSocket text frame:
//! `{"type":"key"|"mouse","action":"down"|"up","code":"KeyW","button":0}`.
//! Only the fields a known type/action pair needs are inspected, so
//! other relay traffic decodes fine and is ignored.

use serde::Deserialize;
use serde_json::Value;

use crate::state::InputEvent;

/// A decoded relay frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    code: Value,
    #[serde(default)]
    button: Value,
}

impl RelayMessage {
    /// Decode a frame; only non-object JSON is an error
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Map onto an engine input; unknown type/action pairs yield `None`
    pub fn into_input(self) -> Option<InputEvent> {
        let code = || self.code.as_str().map(str::to_string);
        let button = || self.button.as_i64();

        match (self.kind.as_deref(), self.action.as_deref()) {
            (Some("key"), Some("down")) => code().map(InputEvent::KeyDown),
            (Some("key"), Some("up")) => code().map(InputEvent::KeyUp),
            (Some("mouse"), Some("down")) => button().map(InputEvent::MouseDown),
            (Some("mouse"), Some("up")) => button().map(InputEvent::MouseUp),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_key_messages() {
        let msg = assert_ok!(RelayMessage::parse(
            r#"{"type":"key","action":"down","code":"KeyW"}"#
        ));
        assert_eq!(msg.into_input(), Some(InputEvent::KeyDown("KeyW".into())));

        let msg = assert_ok!(RelayMessage::parse(r#"{"type":"key","action":"up","code":"KeyA"}"#));
        assert_eq!(msg.into_input(), Some(InputEvent::KeyUp("KeyA".into())));
    }

    #[test]
    fn test_mouse_messages() {
        let msg = assert_ok!(RelayMessage::parse(r#"{"type":"mouse","action":"down","button":4}"#));
        assert_eq!(msg.into_input(), Some(InputEvent::MouseDown(4)));

        let msg = assert_ok!(RelayMessage::parse(r#"{"type":"mouse","action":"up","button":0}"#));
        assert_eq!(msg.into_input(), Some(InputEvent::MouseUp(0)));
    }

    #[test]
    fn test_unknown_combinations_ignored() {
        for text in [
            r#"{"type":"scroll","action":"down","button":0}"#,
            r#"{"type":"key","action":"press","code":"KeyW"}"#,
            r#"{"type":"key","action":"down"}"#,
            r#"{"type":"mouse","action":"down","code":"KeyW"}"#,
            r#"{"type":"status"}"#,
            r#"{"type":"status","code":404,"button":"left"}"#,
            r#"{"type":"mouse","action":"down","button":"left"}"#,
            r#"{"type":"key","action":"down","code":87}"#,
            r#"{"action":"down"}"#,
            r#"{}"#,
        ] {
            let msg = assert_ok!(RelayMessage::parse(text));
            assert_eq!(msg.into_input(), None, "{}", text);
        }
    }

    #[test]
    fn test_malformed_messages_rejected() {
        assert_err!(RelayMessage::parse("not json"));
        assert_err!(RelayMessage::parse("[1, 2]"));
        assert_err!(RelayMessage::parse(r#"{"type":7}"#));
    }
}
