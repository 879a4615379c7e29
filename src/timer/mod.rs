//! Decay timer module
//!
//! Per-slot linger countdowns; the only source of state changes that
//! are not driven directly by input.

mod decay;

pub use decay::{DecayTimers, Expired, TimerSlot};
