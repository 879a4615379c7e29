//! Events module for overlay output
//!
//! Published on a broadcast channel whenever the resolved state changes
//! or a new frame is put on screen.

use serde::{Deserialize, Serialize};

use crate::sprite::SpriteFrame;
use crate::state::VisualState;

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlayEvent {
    /// Priority arbitration picked a different state
    StateResolved {
        from: VisualState,
        to: VisualState,
    },

    /// A frame became visible
    FrameShown(SpriteFrame),
}

impl std::fmt::Display for OverlayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayEvent::StateResolved { from, to } => {
                write!(f, "STATE_RESOLVED ({} -> {})", from, to)
            }
            OverlayEvent::FrameShown(frame) => {
                write!(
                    f,
                    "FRAME_SHOWN ({}[{}] {})",
                    frame.state,
                    frame.index,
                    frame.path.display()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = OverlayEvent::StateResolved {
            from: VisualState::Idle,
            to: VisualState::Wasd,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("state_resolved"));
        assert!(json.contains("\"to\":\"wasd\""));
    }

    #[test]
    fn test_frame_event_round_trip() {
        let json = r#"{"type":"frame_shown","state":"talk","index":1,"path":"sprites/talk_2.png"}"#;
        let event: OverlayEvent = serde_json::from_str(json).unwrap();
        match &event {
            OverlayEvent::FrameShown(frame) => {
                assert_eq!(frame.state, VisualState::Talk);
                assert_eq!(frame.index, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(event.to_string(), "FRAME_SHOWN (talk[1] sprites/talk_2.png)");
    }
}
