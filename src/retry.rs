use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ApiResult;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_retries: u32,
    pub base: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            max_retries: 3,
            base: Duration::from_millis(2000),
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * 2u32.pow(attempt)
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of retries.
pub async fn with_backoff<T, F, Fut>(label: &str, backoff: Backoff, mut op: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < backoff.max_retries => {
                let delay = backoff.delay(attempt);
                warn!(
                    "{} failed ({}), attempt {}/{}, backing off {:.1}s",
                    label,
                    e,
                    attempt + 1,
                    backoff.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
