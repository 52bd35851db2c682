//! Agent error types.

use crate::config::ConfigError;
use thiserror::Error;
use warbot_client::ClientError;
use warbot_storage::StorageError;

/// Errors raised while setting up or driving the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),
}
