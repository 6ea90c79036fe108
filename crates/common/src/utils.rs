//! Utility functions for the DI model copier
//!
//! This module provides formatting, secret masking and retry helpers.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::types::RetryPolicy;

/// Visible prefix length of a masked secret
const MASK_PREFIX_LEN: usize = 4;

/// Formats a duration into a human-readable string
///
/// # Examples
///
/// ```
/// use common::utils::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs == 0 {
        return format!("{}ms", duration.subsec_millis());
    }

    let hours = total_secs / (60 * 60);
    let minutes = (total_secs % (60 * 60)) / 60;
    let seconds = total_secs % 60;

    let mut result = String::new();

    if hours > 0 {
        result.push_str(&format!("{}h ", hours));
    }

    if minutes > 0 || !result.is_empty() {
        result.push_str(&format!("{}m ", minutes));
    }

    result.push_str(&format!("{}s", seconds));

    result
}

/// Masks a secret, keeping only a short prefix
///
/// # Examples
///
/// ```
/// use common::utils::mask_secret;
///
/// assert_eq!(mask_secret("abcdefgh12345"), "abcd...");
/// assert_eq!(mask_secret("abc"), "***");
/// ```
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() <= MASK_PREFIX_LEN * 2 {
        return "***".to_string();
    }

    let prefix: String = secret.chars().take(MASK_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

/// Runs `operation` until it succeeds, fails with a non-transient error,
/// or the policy's retries are spent
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.backoff_for(retry);
                warn!(
                    "{} failed ({}), retry {}/{} in {}",
                    operation_name,
                    e,
                    retry,
                    policy.max_retries,
                    format_duration(delay)
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
