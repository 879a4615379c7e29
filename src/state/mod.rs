//! State module for channel tracking and resolution
//!
//! Three channels each hold a desired state:
//! - voice: Talk or Scream while the microphone is loud
//! - keys: Wasd while a movement key is held
//! - mouse: Mouse after a tracked button click
//!
//! The engine resolves them by priority into the displayed state.

mod channels;
mod engine;
mod resolver;

pub use channels::{UnknownState, VisualState};
pub use engine::{EngineHandle, InputEvent, OverlayEngine, Snapshot};
pub use resolver::PriorityTable;
