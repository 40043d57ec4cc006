/// Periodic purge of expired revocation records
///
/// Blacklist entries and ledger rows are only useful until the token they
/// describe would have expired anyway. This loop removes them so storage
/// stays bounded; a failed run is logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::session::SessionManager;

/// Returns `None` when `interval_seconds` is 0 (purging disabled)
pub fn spawn_purge_task(
    session: Arc<SessionManager>,
    interval_seconds: u64,
) -> Option<JoinHandle<()>> {
    if interval_seconds == 0 {
        tracing::info!("Revocation purge task disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;

        tracing::info!(interval_seconds, "Revocation purge task started");

        loop {
            ticker.tick().await;
            match session.purge_expired().await {
                Ok(report) if report.total() > 0 => {
                    tracing::info!(
                        blacklist_entries = report.blacklist_entries,
                        refresh_tokens = report.refresh_tokens,
                        "Purge run completed"
                    );
                }
                Ok(_) => tracing::debug!("Purge run found nothing to remove"),
                Err(e) => tracing::error!(error = %e, "Purge run failed"),
            }
        }
    }))
}
