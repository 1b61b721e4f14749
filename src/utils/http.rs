use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

/// Backoff settings for [`request_with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Retries a request closure with exponential backoff.
/// Retries on:
/// - Network errors
/// - 429 Too Many Requests (respects Retry-After header)
/// - 5xx Server Errors
///
/// Returns the last Response (even if error status) or the last network error.
pub async fn request_with_retry<F, Fut>(
    mut task: F,
    policy: RetryPolicy,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    let mut delay = policy.base_delay;

    loop {
        attempt += 1;
        match task().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || attempt > policy.max_retries {
                    return Ok(response);
                }

                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    let retry_delay = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(delay);

                    warn!(
                        %status,
                        retry_in_ms = retry_delay.as_millis() as u64,
                        attempt,
                        max_retries = policy.max_retries,
                        "HTTP request failed, retrying"
                    );
                    tokio::time::sleep(retry_delay).await;
                    delay = std::cmp::min(delay * 2, policy.max_delay);
                    continue;
                }

                // 400, 401, 404 and friends are permanent.
                return Ok(response);
            }
            Err(e) => {
                if attempt > policy.max_retries {
                    return Err(e);
                }
                warn!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    attempt,
                    max_retries = policy.max_retries,
                    "HTTP network error, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, policy.max_delay);
            }
        }
    }
}
