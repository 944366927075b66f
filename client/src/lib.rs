//! bfstats - client for the FESL account/stats service and the Theater
//! server browser
//!
//! The wire protocol, correlation and session handling live in the sans-IO
//! [`protocol`] crate. This crate adds sockets: an async façade on tokio at
//! the crate root and a blocking one under [`blocking`].

pub mod blocking;
pub mod config;
pub mod connection;
pub mod fesl;
pub mod options;
pub mod output;
pub mod theater;
pub mod transport;

pub use connection::Connection;
pub use fesl::{Credentials, FeslClient};
pub use options::ClientOptions;
pub use theater::TheaterClient;

pub use protocol;
