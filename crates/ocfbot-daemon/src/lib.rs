//! ocfbot Daemon Library
//!
//! The bot side of `ocfbot`:
//! - Readiness gating on the chat connection
//! - The account event relay and its reconnect policy
//! - Supervision of background tasks
//! - The chat command table and its handlers

pub mod chat;
pub mod commands;
pub mod context;
pub mod readiness;
pub mod relay;
pub mod sink;
pub mod supervisor;

pub use chat::{ChatConnection, DeliveryError, LogChat};
pub use commands::{CommandEntry, CommandTable, IncomingMessage, Reply};
pub use context::BotContext;
pub use readiness::{ConnectionState, ReadinessGate};
pub use relay::{ReconnectPolicy, RelayController, RelayError};
pub use sink::OutputSink;
pub use supervisor::{Supervisor, SupervisorPolicy, TaskFailure};
