//! Supervision of long-running background tasks.
//!
//! A supervised task runs on its own tokio task so that both errors and
//! panics are caught. Every failure is logged and announced in the
//! diagnostics channel, then the [`SupervisorPolicy`] decides whether the
//! task is started again. A run that outlasted `backoff.reset_after` counts
//! as healthy, so the restart count starts over after it.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;

use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use ocfbot_core::config::RelayConfig;

use crate::relay::ReconnectPolicy;
use crate::sink::OutputSink;

/// What to do once a supervised task has failed.
#[derive(Debug, Clone)]
pub enum SupervisorPolicy {
    /// Start the task again after a backoff delay. Exhausting
    /// `backoff.max_attempts` terminates.
    Restart { backoff: ReconnectPolicy },
    /// Return the failure to the caller.
    Terminate,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self::Restart {
            backoff: ReconnectPolicy::default(),
        }
    }
}

impl SupervisorPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        if config.restart_on_failure {
            Self::Restart {
                backoff: ReconnectPolicy::from(config),
            }
        } else {
            Self::Terminate
        }
    }
}

/// A supervised task failed and will not be restarted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task} failed: {reason}")]
pub struct TaskFailure {
    pub task: String,
    pub reason: String,
}

/// Runs tasks under a [`SupervisorPolicy`].
pub struct Supervisor {
    diagnostics: OutputSink,
    channel: String,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(diagnostics: OutputSink, channel: impl Into<String>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            diagnostics,
            channel: channel.into(),
            shutdown,
        }
    }

    /// Run the task produced by `factory` until it completes cleanly, or
    /// fails and the policy says to give up.
    ///
    /// `factory` is called once per start.
    pub async fn run<F, Fut, E>(
        &self,
        name: &str,
        policy: &SupervisorPolicy,
        mut factory: F,
    ) -> Result<(), TaskFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut shutdown = self.shutdown.clone();
        let mut restarts: u32 = 0;

        loop {
            info!(task = name, restarts, "Starting supervised task");
            let started = Instant::now();
            let reason = match tokio::spawn(factory()).await {
                Ok(Ok(())) => {
                    info!(task = name, "Supervised task finished");
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(join_err) if join_err.is_panic() => {
                    format!("panicked: {}", panic_message(&*join_err.into_panic()))
                }
                Err(join_err) => join_err.to_string(),
            };

            self.report(name, &reason).await;
            let failure = TaskFailure {
                task: name.to_string(),
                reason,
            };

            let backoff = match policy {
                SupervisorPolicy::Terminate => return Err(failure),
                SupervisorPolicy::Restart { backoff } => backoff,
            };
            if started.elapsed() > backoff.reset_after {
                restarts = 0;
            }
            if !backoff.should_retry(restarts) {
                error!(task = name, restarts, "Giving up on supervised task");
                return Err(failure);
            }
            if *shutdown.borrow() {
                return Err(failure);
            }

            let delay = backoff.delay_for_attempt(restarts);
            warn!(task = name, restarts, delay_ms = delay.as_millis(), "Restarting supervised task");
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!(task = name, "Shutdown requested, not restarting");
                    return Err(failure);
                }
            }
            restarts = restarts.saturating_add(1);
        }
    }

    /// Log a failure and announce it in the diagnostics channel.
    async fn report(&self, name: &str, reason: &str) {
        let message = format!("ocfbot exception in task {name}: {reason}");
        error!(task = name, error = %reason, "Supervised task failed");
        if !self.diagnostics.say(&self.channel, &message).await {
            warn!(task = name, channel = %self.channel, "Could not announce task failure");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
