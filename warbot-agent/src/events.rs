//! Notifications published by the agent.

/// An agent lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The game accepted the login.
    Authenticated { warzone: i32, username: String },
    /// The game connection closed.
    ConnectionClosed,
    /// A human-readable progress line.
    Progress(String),
}
