//! Polling of backend background tasks (clip generation, uploads).

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::api::{ApiClient, ApiError};
use crate::models::TaskStatus;

/// Default delay between status fetches
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Re-fetch `/tasks/{task_id}` every `interval` until it completes or fails.
///
/// Every snapshot, including the terminal one, is passed to `on_progress`.
/// A request error ends the wait and is returned as-is.
pub async fn wait_for_task<F>(
    api: &ApiClient,
    task_id: &str,
    interval: Duration,
    mut on_progress: F,
) -> Result<TaskStatus, ApiError>
where
    F: FnMut(&TaskStatus),
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let status = api.task_status(task_id).await?;
        debug!(task_id, state = ?status.status, progress = status.progress, "Task status");
        on_progress(&status);
        if status.status.is_terminal() {
            return Ok(status);
        }
    }
}
