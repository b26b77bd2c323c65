//! Session Model
//!
//! A `Session` identifies one live conversation between a client and the
//! upstream engine. It is owned by a single relay task and dropped when
//! either side disconnects.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of the upstream connection backing a session.
///
/// `Idle → Connecting → Configuring → Active → Ended`, with `Error` reachable
/// from every non-terminal state. `Ended` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Configuring,
    Active,
    Ended,
    Error,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Error)
    }

    /// Whether outbound frames may be written in this state.
    pub fn accepts_outbound(self) -> bool {
        matches!(self, Self::Configuring | Self::Active)
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Error) => true,
            (Idle, Connecting) => true,
            (Connecting, Configuring) => true,
            (Configuring, Active) => true,
            // A clean close may arrive before the engine ever acknowledged.
            (Configuring | Active, Ended) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Configuring => "configuring",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One live conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    /// Identifier assigned by the upstream engine once it acknowledges the session.
    pub provider_session_id: Option<String>,
    pub state: ConnectionState,
    pub dynamic_variables: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(dynamic_variables: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_session_id: None,
            state: ConnectionState::Idle,
            dynamic_variables,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Configuring));
        assert!(Configuring.can_transition_to(Active));
        assert!(Active.can_transition_to(Ended));
    }

    #[test]
    fn test_error_reachable_from_live_states_only() {
        for state in [Idle, Connecting, Configuring, Active] {
            assert!(state.can_transition_to(Error), "{state} -> error");
        }
        assert!(!Ended.can_transition_to(Error));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn test_terminal_states_cannot_restart() {
        assert!(!Ended.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Idle));
        assert!(!Active.can_transition_to(Configuring));
        assert!(!Idle.can_transition_to(Active));
    }

    #[test]
    fn test_outbound_window() {
        assert!(Configuring.accepts_outbound());
        assert!(Active.accepts_outbound());
        assert!(!Connecting.accepts_outbound());
        assert!(!Ended.accepts_outbound());
    }

    #[test]
    fn test_new_session_starts_idle() {
        let vars = BTreeMap::from([("booking_id".to_string(), "ABC123".to_string())]);
        let session = Session::new(vars);
        assert_eq!(session.state, Idle);
        assert!(session.provider_session_id.is_none());
        assert_eq!(session.dynamic_variables["booking_id"], "ABC123");
        assert_eq!(format!("{}", session.state), "idle");
    }
}
