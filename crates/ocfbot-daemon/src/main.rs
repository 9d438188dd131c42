//! `ocfbot` Daemon
//!
//! Relays account request events from the task-queue broker into chat, and
//! exposes the chat command table for one-off dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use ocfbot_core::config::{Config, load_config};
use ocfbot_core::Formatter;
use ocfbot_daemon::commands::accounts::CeleryRequestQueue;
use ocfbot_daemon::commands::check::{GROUP_FILE, GroupDatabase, NoDirectory};
use ocfbot_daemon::commands::lab::NoLabStats;
use ocfbot_daemon::relay::{self, ReconnectPolicy, RelayController};
use ocfbot_daemon::{
    BotContext, ChatConnection, CommandTable, IncomingMessage, LogChat, OutputSink,
    ReadinessGate, Supervisor, SupervisorPolicy,
};

#[derive(Parser, Debug)]
#[command(name = "ocfbot")]
#[command(version, about = "ocfbot - OCF account event relay")]
struct Args {
    /// Config file path (defaults to ~/.config/ocfbot/config.toml)
    #[arg(long, env = "OCFBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "OCFBOT_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "OCFBOT_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relay broker events, writing announcements to the log.
    Relay,
    /// Load and validate the configuration, then exit.
    CheckConfig,
    /// Dispatch one chat line through the command table and log the replies.
    Dispatch {
        /// Nick the line is said by
        #[arg(long)]
        nick: String,

        /// Channel the line is said in
        #[arg(long, default_value = "#ocf")]
        channel: String,

        /// The line itself, e.g. ".list"
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = ocfbot_core::tracing_init::default_filter(&args.log_level);
    ocfbot_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::Relay => run_relay(config).await,
        Command::CheckConfig => check_config(&config),
        Command::Dispatch {
            nick,
            channel,
            text,
        } => dispatch(config, IncomingMessage::new(nick, channel, text)).await,
    }
}

async fn run_relay(config: Config) -> anyhow::Result<()> {
    let source = relay::broker_source(&config.celery)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        queue = %source.queue(),
        "Starting ocfbot relay"
    );

    let chat: Arc<dyn ChatConnection> = Arc::new(LogChat);
    let sink = OutputSink::new(Arc::clone(&chat));
    let readiness = ReadinessGate::new();
    let controller = Arc::new(
        RelayController::new(
            source,
            Formatter::new(config.channels.destinations()),
            sink.clone(),
            readiness.clone(),
        )
        .with_reconnect(ReconnectPolicy::from(&config.relay)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = Supervisor::new(sink, config.channels.diagnostics.clone(), shutdown_rx.clone());
    let policy = SupervisorPolicy::from_config(&config.relay);

    let task_controller = Arc::clone(&controller);
    let mut supervised = tokio::spawn(async move {
        supervisor
            .run("relay", &policy, move || {
                let controller = Arc::clone(&task_controller);
                let shutdown = shutdown_rx.clone();
                async move { controller.run(shutdown).await }
            })
            .await
    });

    // Log output has no channels to join.
    readiness.mark_ready();

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let outcome = tokio::select! {
        result = &mut supervised => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
            None
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
            None
        }
    };

    let _ = shutdown_tx.send(true);
    let outcome = match outcome {
        Some(result) => result,
        None => supervised.await,
    };

    if let Err(e) = controller.source().unbind().await {
        warn!(error = %e, "Failed to remove event queue from broker");
    }

    let stats = controller.stats();
    info!(
        connections = stats.connections(),
        stream_closures = stats.stream_closures(),
        events_relayed = stats.events_relayed(),
        events_dropped = stats.events_dropped(),
        "Relay stopped"
    );

    outcome.context("Relay supervisor panicked")??;
    Ok(())
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    relay::broker_source(&config.celery)?;
    CeleryRequestQueue::from_config(&config.celery)?;
    CommandTable::with_builtins(config.commands.prefix.clone())?;
    info!(
        announce = %config.channels.announce,
        operator = %config.channels.operator,
        diagnostics = %config.channels.diagnostics,
        admins = config.commands.admins.len(),
        "Configuration OK"
    );
    Ok(())
}

async fn dispatch(config: Config, message: IncomingMessage) -> anyhow::Result<()> {
    let table = CommandTable::with_builtins(config.commands.prefix.clone())?;
    let requests = Arc::new(CeleryRequestQueue::from_config(&config.celery)?);
    let groups = GroupDatabase::load(Path::new(GROUP_FILE)).unwrap_or_else(|e| {
        warn!(error = %e, path = GROUP_FILE, "Group database unavailable");
        GroupDatabase::default()
    });
    let ctx = BotContext::new(
        config,
        requests,
        Arc::new(NoDirectory),
        groups,
        Arc::new(NoLabStats),
    );

    let replies = table.dispatch(&ctx, &message).await;
    if replies.is_empty() {
        info!(text = %message.text, "No command matched");
    }
    let chat = LogChat;
    for reply in replies {
        // Replies go back to the channel the line came from.
        let _ = chat.say(&message.channel, &reply.render(&message.nick)).await;
    }
    Ok(())
}
