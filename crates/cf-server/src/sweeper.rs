//! Background removal of leaked scratch artifacts and idle admission state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cf_av::ScratchDir;

use crate::middleware::rate_limit::AdmissionControl;

/// Periodically delete scratch files older than `retention` until `cancel`
/// fires. Each tick also prunes identities that `admission` no longer needs
/// to remember. The first pass runs immediately. A zero `interval` disables
/// the sweeper.
pub async fn run_sweeper(
    scratch: ScratchDir,
    admission: Arc<dyn AdmissionControl>,
    interval: Duration,
    retention: Duration,
    cancel: CancellationToken,
) {
    if interval.is_zero() {
        tracing::info!("Scratch sweeper disabled");
        return;
    }

    tracing::info!(
        "Scratch sweeper started (every {}s, retention {}s)",
        interval.as_secs(),
        retention.as_secs()
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                admission.prune();
                let scratch = scratch.clone();
                match tokio::task::spawn_blocking(move || scratch.sweep_expired(retention)).await {
                    Ok(report) if report.removed > 0 || report.failed > 0 => {
                        tracing::info!(
                            "Sweep removed {} expired artifacts ({} failed)",
                            report.removed,
                            report.failed
                        );
                    }
                    Ok(_) => tracing::debug!("Sweep found nothing to remove"),
                    Err(e) => tracing::error!("Sweep task failed: {e}"),
                }
            }
        }
    }

    tracing::info!("Scratch sweeper stopped");
}
