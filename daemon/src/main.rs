//! silence-daemon: global mute hotkeys
//!
//! This daemon runs in the background and provides:
//! - System-wide keyboard and mouse-button interception
//! - Toggle and Hold hotkey matching with modifier-only support
//! - Interactive hotkey recording with dwell disambiguation
//! - IPC server for the settings UI (unix)
//!
//! Muting the microphone, overlays and settings persistence belong to the
//! client; the daemon only reports hotkey events.

mod config;
mod engine;
mod events;
mod hotkey;
#[cfg(unix)]
mod ipc;
mod lifecycle;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::engine::{Command, Dispatcher};
use crate::events::HotkeyEvent;
use crate::hotkey::{HotkeyListener, SystemModifiers};
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "silence-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        toggle = %config.toggle,
        hold = %config.hold,
        capture_mouse = config.capture_mouse,
        "configuration loaded"
    );

    let shutdown = ShutdownSignal::new();

    // Engine -> IPC clients and the log
    let (event_tx, _event_rx) = broadcast::channel::<HotkeyEvent>(256);

    let listener = HotkeyListener::platform(config.capture_mouse);
    let (mut dispatcher, engine_rx) =
        Dispatcher::new(listener, Arc::new(SystemModifiers::new()), event_tx.clone());
    let engine = dispatcher.handle();

    engine.send(Command::ConfigureBindings {
        toggle: config.toggle,
        hold: config.hold,
    })?;
    engine.send(Command::StartTap)?;

    #[cfg(unix)]
    let server = ipc::Server::new(
        &config.socket_path,
        engine.clone(),
        dispatcher.status(),
        event_tx.clone(),
    )?;
    #[cfg(unix)]
    let ipc_task = server.run();
    #[cfg(not(unix))]
    let ipc_task = std::future::pending::<Result<()>>();

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the engine (input, dwell ticks, commands)
        _ = dispatcher.run(engine_rx) => {
            info!("hotkey engine exited");
        }

        // Run the IPC server (accepts client connections)
        result = ipc_task => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log every engine event
        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event @ HotkeyEvent::HoldProgress { .. }) => debug!(%event, "hotkey event"),
                    Ok(event) => info!(%event, "hotkey event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event log receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event log exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    dispatcher.shutdown();
    #[cfg(unix)]
    server.shutdown().await;

    info!("silence-daemon stopped");

    Ok(())
}
