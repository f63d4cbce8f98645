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

use faye_redis::config::Config;
use faye_redis::{App, telemetry};
use tokio::sync::watch;
use tracing::Instrument;

/// Runs the coordination core standalone: no Bayeux/HTTP transport is
/// implemented here, so the only externally visible effect is what you
/// see in the logs — connect, accept the signal, shut down cleanly. A
/// real deployment links this crate into its own protocol-layer binary
/// and drives `Engine` directly.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    telemetry::init_telemetry(&config.log_level, config.log_format)?;
    faye_redis::setup_panic_hook();

    let boot_span = tracing::info_span!("boot_engine");
    let (app, shutdown_tx, shutdown_rx) = async {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        faye_redis::spawn_signal_handler(shutdown_tx.clone());

        let app = App::build(&config).await?;
        tracing::info!(namespace = %config.namespace, host = %config.host, port = config.port, "engine connected");

        Ok::<_, anyhow::Error>((app, shutdown_tx, shutdown_rx))
    }
    .instrument(boot_span)
    .await?;

    let gc_task = app.spawn_workers(shutdown_rx.clone());

    let mut wait_rx = shutdown_rx.clone();
    let _ = wait_rx.wait_for(|&stop| stop).await;

    let _ = shutdown_tx.send(true);
    app.engine.disconnect().await;

    if (tokio::time::timeout(std::time::Duration::from_secs(10), gc_task).await).is_err() {
        tracing::warn!("timed out waiting for gc worker to shut down");
    }

    tracing::info!("engine process stopped");
    Ok(())
}
