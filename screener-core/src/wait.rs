use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Bounded polling: run `probe` up to `attempts` times, `interval` apart,
/// until it yields a value. The external UI and the filesystem offer no
/// notification channel, so every suspension in the pipeline funnels through
/// this one primitive. Exactly `attempts` probes are made on exhaustion; no
/// sleep follows the final probe.
pub async fn await_condition<T, E, F, Fut>(
    attempts: usize,
    interval: Duration,
    mut probe: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 0..attempts {
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }
        if attempt + 1 < attempts {
            sleep(interval).await;
        }
    }
    Ok(None)
}

/// Number of probes a timeout budget buys at the given poll interval,
/// never less than one.
pub fn attempts_for(timeout: Duration, interval: Duration) -> usize {
    let interval_ms = interval.as_millis().max(1);
    ((timeout.as_millis() + interval_ms - 1) / interval_ms).max(1) as usize
}
