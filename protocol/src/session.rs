//! Per-connection session state
//!
//! State transitions:
//! ```text
//! DISCONNECTED → CONNECTED → HELLO_SENT → CHALLENGE_PENDING → AUTHENTICATED
//!                    ↓            ↓               ↓                 ↓
//!                    └────────────┴───────────────┴─────────────────┴──→ CLOSED
//!                                   (logout, fatal error, disconnect)
//! ```
//!
//! On FESL, `CHALLENGE_PENDING` is entered once the server's memory check
//! has been answered. On Theater, it is entered when `CONN` is acknowledged.

use crate::constants::Platform;
use crate::error::{Error, Result};
use crate::packets::Dialect;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    /// No transport yet
    #[default]
    Disconnected,

    /// Transport established, no handshake sent
    Connected,

    /// Handshake sent, waiting for the server's reaction
    HelloSent,

    /// Handshake done, credentials may be presented
    ChallengePending,

    /// Logged in, queries permitted
    Authenticated,

    /// Terminal; the connection must not be used again
    Closed,
}

impl SessionState {
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Disconnected, Connected) => true,
            (Connected, HelloSent) => true,
            (HelloSent, ChallengePending) => true,
            (ChallengePending, Authenticated) => true,

            (Closed, Closed) => true,
            (_, Closed) => true,

            _ => false,
        }
    }

    pub fn transition_to(&mut self, next: SessionState) -> Result<()> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::HelloSent => write!(f, "HelloSent"),
            SessionState::ChallengePending => write!(f, "ChallengePending"),
            SessionState::Authenticated => write!(f, "Authenticated"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Where the Theater service for this account lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TheaterEndpoint {
    pub host: String,
    pub port: u16,
}

/// Identity established by a successful login
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Account {
    pub user_id: Option<i64>,
    pub profile_id: Option<i64>,
    pub display_name: Option<String>,
}

/// Mutable state shared by every operation on one connection
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    dialect: Dialect,
    platform: Platform,
    login_key: Option<String>,
    theater: Option<TheaterEndpoint>,
    server_time: Option<String>,
    account: Option<Account>,
    observed_lobbies: BTreeSet<u64>,
}

impl Session {
    pub fn new(dialect: Dialect, platform: Platform) -> Self {
        Self {
            state: SessionState::Disconnected,
            dialect,
            platform,
            login_key: None,
            theater: None,
            server_time: None,
            account: None,
            observed_lobbies: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        let previous = self.state;
        self.state.transition_to(next)?;
        if previous != next {
            debug!("{:?} session {} -> {}", self.dialect, previous, next);
        }
        Ok(())
    }

    /// Fails with `InvalidState` unless the session is in `expected`
    pub fn require(&self, operation: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Moves to the terminal state and forgets credentials
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!("{:?} session closed from {}", self.dialect, self.state);
        }
        self.state = SessionState::Closed;
        self.login_key = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub(crate) fn set_theater(&mut self, endpoint: TheaterEndpoint) {
        self.theater = Some(endpoint);
    }

    pub(crate) fn set_server_time(&mut self, time: Option<String>) {
        self.server_time = time;
    }

    pub(crate) fn set_login(&mut self, login_key: String, account: Account) {
        self.login_key = Some(login_key);
        self.account = Some(account);
    }

    /// Theater endpoint announced during the hello; available once authenticated
    pub fn theater_endpoint(&self) -> Result<&TheaterEndpoint> {
        self.require("theater details", SessionState::Authenticated)?;
        self.theater.as_ref().ok_or(Error::MissingField {
            record: "hello",
            key: "theaterIp".into(),
        })
    }

    /// Login key for authenticating the Theater connection
    pub fn login_key(&self) -> Result<&str> {
        self.require("login key", SessionState::Authenticated)?;
        self.login_key.as_deref().ok_or(Error::MissingField {
            record: "login",
            key: "lkey".into(),
        })
    }

    pub fn server_time(&self) -> Option<&str> {
        self.server_time.as_deref()
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub(crate) fn observe_lobby(&mut self, lobby_id: u64) {
        self.observed_lobbies.insert(lobby_id);
    }

    /// Whether a lobby listing on this connection included `lobby_id`
    pub fn has_observed_lobby(&self, lobby_id: u64) -> bool {
        self.observed_lobbies.contains(&lobby_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_path() {
        let mut state = SessionState::Disconnected;
        for next in [
            SessionState::Connected,
            SessionState::HelloSent,
            SessionState::ChallengePending,
            SessionState::Authenticated,
            SessionState::Closed,
        ] {
            state.transition_to(next).unwrap();
        }
        assert!(state.is_closed());
    }

    #[test]
    fn test_no_shortcuts() {
        let mut state = SessionState::Connected;
        assert!(state.transition_to(SessionState::Authenticated).is_err());
        assert_eq!(state, SessionState::Connected);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = SessionState::Closed;
        assert!(state.transition_to(SessionState::Connected).is_err());
        assert!(state.transition_to(SessionState::Closed).is_ok());
    }

    #[test]
    fn test_accessors_require_authentication() {
        let mut session = Session::new(Dialect::Fesl, Platform::Pc);
        session.transition(SessionState::Connected).unwrap();
        session.set_theater(TheaterEndpoint {
            host: "theater".into(),
            port: 18326,
        });
        assert!(matches!(
            session.theater_endpoint(),
            Err(Error::InvalidState {
                state: SessionState::Connected,
                ..
            })
        ));
        assert!(session.login_key().is_err());
    }

    #[test]
    fn test_close_forgets_login_key() {
        let mut session = Session::new(Dialect::Fesl, Platform::Pc);
        session.set_login("key".into(), Account::default());
        session.close();
        assert!(session.is_closed());
        assert!(session.login_key().is_err());
    }
}
