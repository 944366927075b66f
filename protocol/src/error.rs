//! Protocol error types

use crate::constants::error_codes;
use crate::packets::{Frame, Tag, TheaterStatus};
use crate::session::SessionState;
use crate::value::ValueKind;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Timed out after {0:?} without receiving data")]
    Timeout(Duration),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{operation} is not permitted in session state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Invalid session state transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Field {key} value {value:?} is not a valid {kind:?}")]
    InvalidValue {
        key: String,
        value: String,
        kind: ValueKind,
    },

    #[error("{record} record lacks required field {key}")]
    MissingField { record: &'static str, key: String },

    #[error("Sequence id space exhausted (maximum {max})")]
    SequenceExhausted { max: u32 },
}

impl Error {
    /// Whether the connection this error occurred on can no longer be used
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::MalformedFrame(_)
            | Self::Transport(_)
            | Self::SequenceExhausted { .. } => true,
            Self::Protocol(error) => error.kind == ProtocolErrorKind::InvalidSession,
            Self::InvalidState { .. }
            | Self::InvalidTransition { .. }
            | Self::InvalidArgument(_)
            | Self::InvalidValue { .. }
            | Self::MissingField { .. } => false,
        }
    }

    /// Protocol error kind, if this is a backend-reported error
    pub fn protocol_kind(&self) -> Option<ProtocolErrorKind> {
        match self {
            Self::Protocol(error) => Some(error.kind),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Classification of backend-reported errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    NotFound,
    TooManyResults,
    AuthenticationFailed,
    InvalidSession,
    InvalidParameter,
    Backend,
}

/// Error reported by the backend in place of a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?} (code {}): {message}", .code.as_deref().unwrap_or("none"))]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl ProtocolError {
    pub fn new(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Classifies a FESL `errorCode`
    pub fn from_fesl_code(code: &str, message: impl Into<String>) -> Self {
        let kind = match code {
            error_codes::INVALID_PARAMETER => ProtocolErrorKind::InvalidParameter,
            error_codes::RECORD_NOT_FOUND | error_codes::NO_MATCH => ProtocolErrorKind::NotFound,
            error_codes::TOO_MANY_RESULTS => ProtocolErrorKind::TooManyResults,
            error_codes::INVALID_PASSWORD => ProtocolErrorKind::AuthenticationFailed,
            error_codes::SESSION_NOT_AUTHORIZED => ProtocolErrorKind::InvalidSession,
            _ => ProtocolErrorKind::Backend,
        };
        Self {
            kind,
            code: Some(code.to_string()),
            message: message.into(),
        }
    }

    /// Classifies a Theater error indicator
    pub fn from_theater_indicator(indicator: Tag) -> Self {
        let (kind, message) = match indicator.as_bytes() {
            b"ngam" => (ProtocolErrorKind::NotFound, "game not found"),
            b"nrom" => (ProtocolErrorKind::NotFound, "lobby not found"),
            b"ntfn" => (ProtocolErrorKind::NotFound, "record not found"),
            b"bpar" => (ProtocolErrorKind::InvalidParameter, "bad parameter"),
            _ => (ProtocolErrorKind::Backend, "backend error"),
        };
        Self {
            kind,
            code: Some(indicator.to_string()),
            message: message.to_string(),
        }
    }

    /// Extracts the error carried by a frame, if any
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        match frame.theater_status() {
            Some(TheaterStatus::Error(indicator)) => Some(Self::from_theater_indicator(indicator)),
            Some(_) => None,
            None => {
                let code = frame.payload.field("errorCode")?;
                let message = frame
                    .payload
                    .field("localizedMessage")
                    .map(|m| m.trim_matches('"').to_string())
                    .unwrap_or_else(|| format!("{} failed", frame.txn().unwrap_or("request")));
                Some(Self::from_fesl_code(code, message))
            }
        }
    }

    /// Re-labels the error while keeping code and message
    pub fn with_kind(mut self, kind: ProtocolErrorKind) -> Self {
        self.kind = kind;
        self
    }
}
