//! # warbot-client
//!
//! Client library for the game server.
//!
//! This crate provides:
//! - A websocket game connection with heartbeat, login and shard hand-off
//! - Sequence and request-id correlation of replies
//! - Cancellable chains of HTTP request/reply calls
//! - Session bootstrap (game version discovery and server list lookup)

pub mod bootstrap;
pub mod chain;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod http;
pub mod stream;
pub mod tls;

pub use bootstrap::{generate_temp_id, Bootstrap};
pub use chain::{CancelHandle, Chain};
pub use connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionOwner, ConnectionState,
};
pub use correlation::{Callback, CorrelationTable, Handler, Route};
pub use error::{ClientError, RequestError};
pub use http::{HttpClient, HttpConfig, HttpResponse};
