//! # warbot-storage
//!
//! Persistence for the game session record.
//!
//! The session survives restarts so the agent can log in again without a
//! fresh token. The record is a small checksummed binary file.

pub mod error;
pub mod session_store;

pub use error::StorageError;
pub use session_store::{SessionStore, SESSION_FILE};
