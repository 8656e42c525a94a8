//! API clients for external services
//!
//! - TorrServer: the streaming daemon's HTTP interface

pub mod torrserver;

pub use torrserver::{ApiError, StreamingApi, TorrServerClient};
