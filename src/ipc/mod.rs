//! IPC module for external control and test access

mod protocol;
mod server;

pub use server::Server;
