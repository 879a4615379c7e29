//! Audio module for microphone loudness
//!
//! Converts a PCM stream into a smoothed 0-255 level and classifies
//! levels into voice states.

mod meter;
mod pcm;

pub use meter::VoiceGate;
pub use pcm::PcmSampler;
