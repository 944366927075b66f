//! bfstats protocol library
//!
//! Sans-IO implementation of the FESL and Theater game backend protocols:
//! frame encoding and decoding, request correlation and multi-frame
//! reassembly, the login state machine and the typed operations built on
//! top of them. Sockets and runtimes live in the `bfstats` client crate.

pub mod catalog;
pub mod codec;
pub mod constants;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod fesl;
pub mod packets;
pub mod payload;
pub mod session;
pub mod theater;
pub mod value;

pub use catalog::StatsCatalog;
pub use codec::FrameDecoder;
pub use constants::{Namespace, Platform};
pub use correlation::{LogicalResponse, Request};
pub use engine::{Engine, Operation, Ticket};
pub use error::{Error, ProtocolError, ProtocolErrorKind, Result};
pub use packets::{Dialect, Frame, Tag};
pub use payload::{FieldPath, Payload};
pub use session::{Account, Session, SessionState, TheaterEndpoint};
pub use value::{Value, ValueKind};
