//! Transport retry with exponential backoff and jitter
//!
//! Wraps a `ChatProvider` call with classified retry: timeout, network,
//! 5xx and rate-limit errors are retried with exponential backoff plus
//! random jitter; auth and request-shape errors surface immediately.
//!
//! This is the transport-level retry. It is distinct from the
//! orchestrator's bounded empty-reply retry and from the executor's
//! single classified-error retry.

use super::{ChatError, ChatProvider, Message};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for model calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts (first call included)
    pub max_retries: u32,

    /// Base backoff delay in milliseconds; attempt n waits roughly
    /// `base * 2^n` plus jitter
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for the given zero-based attempt, with jitter
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base_ms.saturating_mul(1u64 << attempt.min(6));
        let jitter = rand::thread_rng().gen_range(0..=self.backoff_base_ms);
        Duration::from_millis(base + jitter)
    }
}

/// Call the provider, retrying retryable failures per the policy.
///
/// Returns the first successful reply, or the last error once attempts
/// are exhausted. Non-retryable errors (auth, invalid request) are
/// returned on first occurrence.
pub async fn chat_with_retry(
    provider: &dyn ChatProvider,
    messages: &[Message],
    policy: RetryPolicy,
) -> Result<String, ChatError> {
    let mut last_err: Option<ChatError> = None;

    for attempt in 0..=policy.max_retries {
        match provider.chat(messages).await {
            Ok(text) => {
                if attempt > 0 {
                    debug!(
                        "Provider {} recovered on attempt {}",
                        provider.name(),
                        attempt + 1
                    );
                }
                return Ok(text);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    "Provider {} failed (attempt {}): {}; retrying in {:?}",
                    provider.name(),
                    attempt + 1,
                    e,
                    delay
                );
                last_err = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or(ChatError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        fail_first: u32,
        error_kind: fn() -> ChatError,
    }

    #[async_trait]
    impl ChatProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn chat(&self, _messages: &[Message]) -> Result<String, ChatError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err((self.error_kind)())
            } else {
                Ok("recovered".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
            error_kind: || ChatError::Network("reset".into()),
        };
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 1,
        };
        let text = chat_with_retry(&provider, &[Message::user("hi")], policy)
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 10,
            error_kind: || ChatError::Auth("bad key".into()),
        };
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 1,
        };
        let err = chat_with_retry(&provider, &[Message::user("hi")], policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 10,
            error_kind: || ChatError::RateLimited,
        };
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
        };
        let err = chat_with_retry(&provider, &[Message::user("hi")], policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::RateLimited));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
