//! WebSocket Session Relay
//!
//! - `protocol`: the frames the relay synthesizes for the client.
//! - `provider`: upstream endpoints and handshake headers per provider.
//! - `upstream`: the single outbound connection and its state machine.
//! - `session`: the upgrade handler and the two-way relay loop.

pub mod protocol;
pub mod provider;
pub mod session;
pub mod upstream;

pub use session::ws_handler;
