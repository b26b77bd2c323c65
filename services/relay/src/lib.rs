//! Sales Agent Relay Library Crate
//!
//! The WebSocket relay between a browser client and the upstream
//! conversational engine: configuration, shared state, routing and the
//! per-session relay loop. The `relay` binary is a thin wrapper around this
//! library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
