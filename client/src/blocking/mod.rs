//! Blocking façade
//!
//! Same engine and operations as the async clients; every call blocks the
//! current thread on socket reads and writes, bounded by the socket
//! timeouts set at connect time.

mod connection;
mod fesl;
mod theater;

pub use connection::Connection;
pub use fesl::FeslClient;
pub use theater::TheaterClient;

use crate::transport::{Stream, StreamTransport};

/// Transport type produced by the blocking `connect` constructors
pub type DefaultTransport = StreamTransport<Box<dyn Stream>>;
