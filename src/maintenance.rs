use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db;
use crate::state::SharedState;

const INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Periodically purge expired auth tokens and stale login-limiter entries.
pub fn spawn(state: SharedState, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("Maintenance task started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            run_once(&state).await;

            tokio::select! {
                _ = tokio::time::sleep(INTERVAL) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::debug!("Maintenance task stopped");
    })
}

pub async fn run_once(state: &SharedState) {
    match db::refresh_tokens::purge_expired(&state.pool).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Purged {n} expired refresh tokens"),
        Err(e) => tracing::error!("Failed to purge refresh tokens: {e}"),
    }

    match db::password_reset_tokens::purge_expired(&state.pool).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Purged {n} expired password reset tokens"),
        Err(e) => tracing::error!("Failed to purge password reset tokens: {e}"),
    }

    state.login_limiter.cleanup();
}
