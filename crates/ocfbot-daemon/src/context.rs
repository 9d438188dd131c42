//! Shared state handed to command handlers.

use std::sync::Arc;

use ocfbot_core::Config;

use crate::commands::accounts::RequestQueue;
use crate::commands::check::{Directory, GroupDatabase};
use crate::commands::lab::LabStats;

/// Everything a handler may use, built once at startup.
pub struct BotContext {
    pub config: Config,
    pub requests: Arc<dyn RequestQueue>,
    pub directory: Arc<dyn Directory>,
    pub groups: GroupDatabase,
    pub lab: Arc<dyn LabStats>,
}

impl BotContext {
    pub fn new(
        config: Config,
        requests: Arc<dyn RequestQueue>,
        directory: Arc<dyn Directory>,
        groups: GroupDatabase,
        lab: Arc<dyn LabStats>,
    ) -> Self {
        Self {
            config,
            requests,
            directory,
            groups,
            lab,
        }
    }
}
