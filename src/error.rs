//! Error classification and retry logic
//!
//! Store operations never fail outward: persistence and transport errors are
//! swallowed at their boundary and logged with a category. Connecting to a
//! relay peer is the one place that retries.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run an async operation until it succeeds or the policy gives up
///
/// Only errors whose category is retryable are retried; anything else is
/// returned after the first attempt.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let error: anyhow::Error = e.into();
                let category = categorize_error(&error);

                if attempts >= policy.max_attempts || !category.is_retryable() {
                    return Err(error.context(format!(
                        "Operation failed after {} attempts ({})",
                        attempts, category
                    )));
                }

                tracing::warn!(
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    %category,
                    "operation failed: {error}; retrying in {delay:?}"
                );

                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

/// Categorized error types for logging swallowed failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Persistent storage is full or refused the write
    Quota,

    /// Persistent storage unavailable or failing
    Storage,

    /// A value could not be encoded or decoded
    Serialization,

    /// Relay/peer transport errors
    Transport,

    /// Unknown errors
    Unknown,
}

impl ErrorCategory {
    /// Transport hiccups are worth retrying, the rest are not
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transport)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Quota => "quota",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Categorize an error
pub fn categorize_error(error: &anyhow::Error) -> ErrorCategory {
    if error.downcast_ref::<serde_json::Error>().is_some() {
        return ErrorCategory::Serialization;
    }
    if let Some(ws) = error.downcast_ref::<tokio_tungstenite::tungstenite::Error>() {
        use tokio_tungstenite::tungstenite::Error as WsError;
        return match ws {
            WsError::Url(_) | WsError::Http(_) | WsError::HttpFormat(_) => ErrorCategory::Unknown,
            _ => ErrorCategory::Transport,
        };
    }
    if let Some(sqlite) = error.downcast_ref::<rusqlite::Error>() {
        return match sqlite.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => ErrorCategory::Quota,
            _ => ErrorCategory::Storage,
        };
    }

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("quota") || error_str.contains("full") {
        ErrorCategory::Quota
    } else if error_str.contains("connection")
        || error_str.contains("websocket")
        || error_str.contains("timeout")
    {
        ErrorCategory::Transport
    } else if error_str.contains("json") || error_str.contains("parse") {
        ErrorCategory::Serialization
    } else if error_str.contains("storage")
        || error_str.contains("database")
        || error_str.contains("permission")
        || error_str.contains("disabled")
    {
        ErrorCategory::Storage
    } else {
        ErrorCategory::Unknown
    }
}
