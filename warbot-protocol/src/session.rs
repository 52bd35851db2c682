//! Session record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials and endpoint for one game-server login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Server (warzone shard) id.
    pub server_id: i32,
    /// Websocket URL of the shard.
    pub server_url: String,
    /// Server-info token returned by the server list lookup.
    pub auth_token: String,
    /// Random per-device identifier.
    pub device_temp_id: String,
}

impl Session {
    /// Returns the websocket endpoint for this session.
    pub fn endpoint(&self) -> String {
        format!("{}?b=1", self.server_url)
    }
}

/// Displays the session with the token shortened.
impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token: String = self.auth_token.chars().take(6).collect();
        write!(
            f,
            "server={} url={} token={}… temp_id={}",
            self.server_id, self.server_url, token, self.device_temp_id
        )
    }
}
