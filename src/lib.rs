#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod telemetry;
pub mod workers;

use crate::config::Config;
use crate::core::Engine;
use crate::workers::GcWorker;
use std::time::Duration;
use tokio::sync::watch;

/// Top-level application object graph: the wired [`Engine`] plus its
/// background workers, ready for [`App::spawn_workers`].
#[derive(Debug)]
pub struct App {
    pub engine: Engine,
    gc_interval: Duration,
}

impl App {
    /// Connects the engine against `config` and registers its
    /// cross-process dispatch handler.
    ///
    /// # Errors
    /// Returns an error if the initial Redis connections cannot be
    /// established.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let engine = Engine::connect(config).await?;
        engine.start_dispatch().await;
        Ok(Self { engine, gc_interval: Duration::from_secs(config.gc_interval_secs) })
    }

    /// Spawns the GC worker, returning its join handle so the caller can
    /// await it during shutdown.
    #[must_use]
    pub fn spawn_workers(&self, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let worker = GcWorker::new(self.engine.clone(), self.gc_interval);
        tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        })
    }
}

/// Sets up a panic hook that logs the panic message and location instead
/// of letting it go to stderr unformatted.
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = payload
            .downcast_ref::<&str>()
            .map_or_else(|| payload.downcast_ref::<String>().map_or_else(|| "Box<Any>", String::as_str), |s| *s);

        let location = panic_info.location().map_or_else(
            || "unknown".to_string(),
            |location| format!("{}:{}:{}", location.file(), location.line(), location.column()),
        );

        tracing::error!(panic.message = %msg, panic.location = %location, "engine process panicked");
    }));
}

/// Returns a future that completes when a termination signal is received.
///
/// # Panics
/// Panics if the signal handlers cannot be installed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received, starting graceful shutdown");
}

/// Spawns a task that listens for OS signals and broadcasts a shutdown
/// signal through `shutdown_tx`.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });
}
