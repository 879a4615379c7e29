//! Relay module for global key/mouse input
//!
//! The presentation surface cannot see global input, so a companion
//! relay captures it and streams up/down events over a WebSocket.

mod client;
mod protocol;

pub use client::RelayClient;
