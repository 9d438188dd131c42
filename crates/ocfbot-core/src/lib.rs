//! `ocfbot` Core Library
//!
//! Shared functionality for `ocfbot` components:
//! - Account request events as published on the task-queue broker
//! - Pure formatting of events into chat announcements
//! - Configuration loading and overrides
//! - Common error types and tracing setup

pub mod config;
pub mod error;
pub mod event;
pub mod format;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{AccountRequest, Event, EventKind};
pub use format::{Destinations, Formatter, OutboundMessage};
