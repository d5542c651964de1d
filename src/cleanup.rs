//! Scheduled cleanup of expired verification codes and refresh tokens.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::Clock;
use crate::db::Database;
use crate::verification::VerificationCodes;

/// What a cleanup pass needs.
#[derive(Clone)]
pub struct CleanupContext {
    pub codes: Arc<VerificationCodes>,
    pub db: Database,
    pub clock: Arc<dyn Clock>,
    /// Refresh tokens stay usable this long past `exp`, so their ledger rows
    /// are kept as long.
    pub refresh_grace_secs: u64,
}

/// Run all cleanup tasks once.
pub async fn run_cleanup(ctx: &CleanupContext) {
    let swept = ctx.codes.clean_expired();
    if swept.total() > 0 {
        info!(
            captchas = swept.captchas,
            email_codes = swept.email_codes,
            "Cleaned up expired verification codes"
        );
    }

    let cutoff = ctx.clock.now().saturating_sub(ctx.refresh_grace_secs);
    match ctx.db.refresh_tokens().delete_expired(cutoff).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired refresh tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired refresh tokens: {}", e),
    }
}

/// Background task running `run_cleanup` on a fixed interval until stopped.
pub struct CleanupScheduler {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupScheduler {
    /// Spawn the cleanup loop. The first pass runs immediately.
    pub fn start(ctx: CleanupContext, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            info!(interval_secs = interval.as_secs(), "Cleanup scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_cleanup(&ctx).await,
                    _ = token.cancelled() => break,
                }
            }

            info!("Cleanup scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Cleanup scheduler task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
