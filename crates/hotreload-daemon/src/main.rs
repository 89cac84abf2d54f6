//! # hotreload-daemon
//!
//! Standalone hot-reload server: loads settings, starts the connection
//! server and health monitor, relays watched file changes to connected
//! clients, and shuts everything down on Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hotreload_core::logging::{LogFormat, init_subscriber};
use hotreload_server::relay::ChangeRelay;
use hotreload_server::shutdown::ShutdownCoordinator;
use hotreload_server::watcher::FileWatcher;
use hotreload_server::{ConnectionServer, EventHub, ServerConfig, ServerEvent};
use hotreload_settings::HotReloadSettings;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Watcher → relay queue depth.
const CHANGE_QUEUE_CAPACITY: usize = 1024;

/// Hot-reload WebSocket server.
#[derive(Parser, Debug)]
#[command(name = "hotreload", about = "Hot-reload WebSocket server for mobile clients")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$HOTRELOAD_SETTINGS` or `~/.axiom/hotreload.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory to watch; repeatable. Replaces the configured paths.
    #[arg(long = "watch", value_name = "DIR")]
    watch: Vec<PathBuf>,

    /// Log filter directive (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: compact or json.
    #[arg(long, value_parser = parse_format)]
    log_format: Option<LogFormat>,
}

fn parse_format(value: &str) -> std::result::Result<LogFormat, String> {
    LogFormat::parse(value).ok_or_else(|| format!("unknown log format '{value}'"))
}

impl Cli {
    /// Apply flags on top of loaded settings.
    fn apply(&self, settings: &mut HotReloadSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if !self.watch.is_empty() {
            settings.watcher.paths = self
                .watch
                .iter()
                .map(|p| p.display().to_string())
                .collect();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn load(cli: &Cli) -> Result<HotReloadSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(hotreload_settings::settings_path);
    let mut settings = hotreload_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

/// Log every server event until shutdown.
fn spawn_event_logger(events: &EventHub, cancel: CancellationToken) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected {
            session_id,
            platform,
            client_name,
        } => tracing::info!(%session_id, %platform, client_name = client_name.as_str(), "client connected"),
        ServerEvent::ClientDisconnected { session_id, reason } => {
            tracing::info!(%session_id, reason = reason.as_str(), "client disconnected");
        }
        ServerEvent::MessageReceived {
            session_id,
            envelope,
        } => tracing::debug!(
            %session_id,
            message_type = envelope.message_type(),
            "client message"
        ),
        ServerEvent::DeliveryFailed { session_id, reason } => {
            tracing::warn!(%session_id, reason = reason.as_str(), "delivery failed");
        }
        ServerEvent::StatusChanged {
            previous,
            current,
            client_count,
        } => tracing::info!(%previous, %current, client_count, "status changed"),
    }
}

/// Start the watcher and relay if any paths are configured.
fn spawn_relay(
    settings: &HotReloadSettings,
    server: &ConnectionServer,
    cancel: CancellationToken,
) -> Result<Option<(FileWatcher, JoinHandle<()>)>> {
    if settings.watcher.paths.is_empty() {
        tracing::info!("no watch paths configured, file relay disabled");
        return Ok(None);
    }
    let paths: Vec<PathBuf> = settings.watcher.paths.iter().map(PathBuf::from).collect();
    let (watcher, changes) = FileWatcher::start(
        &paths,
        settings.watcher.extensions.clone(),
        CHANGE_QUEUE_CAPACITY,
    )
    .context("Failed to start file watcher")?;
    let relay = ChangeRelay::new(
        Arc::clone(server.broadcaster()),
        server.config().debounce,
        server.config().max_message_size,
    );
    let handle = tokio::spawn(relay.run(changes, cancel));
    Ok(Some((watcher, handle)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    let server = ConnectionServer::new(ServerConfig::from(&settings));
    let addr = server.start().await.context("Failed to start server")?;
    tracing::info!(%addr, "listening");

    let coordinator = ShutdownCoordinator::new();
    let logger = spawn_event_logger(server.events(), coordinator.child_token());
    let _ = server.monitor().start().await;

    let relay_cancel = coordinator.child_token();
    let relay = spawn_relay(&settings, &server, relay_cancel.clone())?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("Shutting down...");

    // relay first; the server stops the monitor before closing sessions
    if let Some((watcher, handle)) = relay {
        relay_cancel.cancel();
        drop(watcher);
        let _ = handle.await;
    }
    let _ = server.stop().await;
    coordinator.graceful_shutdown(vec![logger], None).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
