//! # warbot-agent
//!
//! Automation agent: keeps a game account logged in only while there is
//! work to do, and runs the daily in-game routines on a schedule.
//!
//! The [`Agent`] couples a [`Scheduler`] of one-shot and keyed tasks with
//! the connection lifecycle from `warbot-client`.

pub mod actions;
pub mod agent;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;

pub use actions::{choose_science, choose_world_site, plan_deep_sea, ActionState, DeepSeaPlan};
pub use agent::Agent;
pub use config::{Config, ConfigError};
pub use error::AgentError;
pub use events::AgentEvent;
pub use scheduler::{Scheduler, Task, Timings};
