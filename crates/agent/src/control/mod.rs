//! Local control surface.
//!
//! A line-delimited JSON endpoint on a loopback TCP socket that lets
//! non-native embedding hosts drive the agent as a sidecar: one
//! request object per line, one response object per line. Every
//! accepted client runs on its own worker; all clients share the one
//! connection manager.

pub mod messages;
pub mod server;

pub use messages::{ConnectParams, ControlRequest, ControlResponse, ControlStatus};
pub use server::ControlServer;
