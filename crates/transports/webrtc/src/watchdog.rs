//! Enforces each session's configured time limit (§4.1's
//! `wait_for_time_limit`), tearing down sessions that have overstayed
//! their welcome.

use std::time::Duration;

use crate::session::SessionManager;

/// Polls `sessions` for expired entries every `period` until cancelled.
pub async fn run(sessions: std::sync::Arc<SessionManager>, period: Duration, cancel: tokio_util::sync::CancellationToken) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                for id in sessions.expired() {
                    tracing::info!(session = %id, "session exceeded its time limit");
                    sessions.clean_up(&id).await;
                }
            }
        }
    }
}
