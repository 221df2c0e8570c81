pub mod epoch_orchestrator;
pub mod epoch_processor;
pub mod slot_orchestrator;
pub mod slot_processor;

use std::future::Future;
use std::time::Duration;

use crate::client::reliable::attempt_delay;
use crate::controllers;

const STAGE_BASE_DELAY: Duration = Duration::from_secs(1);

/// Stage-level retry: upstream or DB failures re-enter the stage with capped
/// exponential backoff until it succeeds. Stages themselves short-circuit on
/// their progress flag, so a retry never repeats committed work.
pub(crate) async fn retry_stage<T, F, Fut>(label: &'static str, op: F) -> T
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, controllers::Error>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return value,
            Err(error) => {
                tracing::warn!(stage = label, attempt, "Stage failed, retrying: {error}");
                tokio::time::sleep(attempt_delay(STAGE_BASE_DELAY, attempt)).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
