use crate::core::Engine;
use std::time::Duration;
use tracing::Instrument;

/// Runs the engine's `cleanup_expired` reconciliation on a fixed period.
/// Per spec: disabled entirely when `gc_interval` is 0; otherwise starts
/// ticking only once the engine reports [`Engine::gc_started`] (armed by
/// the first client creation, or explicitly), so an idle process with no
/// clients never spins a timer for nothing.
#[derive(Debug)]
pub struct GcWorker {
    engine: Engine,
    interval: Duration,
}

impl GcWorker {
    #[must_use]
    pub fn new(engine: Engine, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if self.interval.is_zero() {
            tracing::info!("gc worker disabled (gc_interval_secs=0)");
            return;
        }

        while !self.engine.gc_started() {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(100)) => {}
                _ = shutdown.changed() => return,
            }
            if *shutdown.borrow() {
                return;
            }
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.perform_cleanup().instrument(tracing::info_span!("gc_cycle")).await {
                        tracing::error!(error = %err, "gc cycle failed");
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("gc worker shutting down");
    }

    #[tracing::instrument(skip(self), err, fields(removed = tracing::field::Empty))]
    async fn perform_cleanup(&self) -> crate::error::Result<()> {
        let removed = self.engine.cleanup_expired().await?;
        if removed > 0 {
            tracing::info!(removed, "reclaimed expired client sessions");
            tracing::Span::current().record("removed", removed);
        }
        Ok(())
    }
}
