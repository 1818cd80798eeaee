//! Retry decorator for chat operations.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use super::error::LlmError;
use super::traits::Chat;
use super::types::{ChatResponse, ChatStream, Content, FunctionDefinition};

/// Bounded exponential backoff settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Wait time for the current backoff value: `backoff + uniform(0, backoff/2)`
    /// when jitter is enabled.
    fn wait_time(&self, backoff: Duration) -> Duration {
        if !self.jitter {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=0.5) * backoff.as_secs_f64();
        backoff + Duration::from_secs_f64(jitter)
    }

    fn next_backoff(&self, backoff: Duration) -> Duration {
        let next = backoff.mul_f64(self.backoff_factor);
        next.min(self.max_backoff)
    }
}

/// Wraps a [`Chat`] with retry-on-transient-failure semantics.
///
/// Only `send` is retried. `send_streaming` is delegated untouched: the
/// initial connect either succeeds or fails once, and mid-stream failures
/// propagate to the consumer.
#[derive(Debug)]
pub struct RetryChat {
    underlying: Box<dyn Chat>,
    config: RetryConfig,
}

impl RetryChat {
    pub fn new(underlying: Box<dyn Chat>, config: RetryConfig) -> Self {
        Self { underlying, config }
    }
}

#[async_trait]
impl Chat for RetryChat {
    async fn send(&mut self, contents: &[Content]) -> Result<ChatResponse, LlmError> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 1u32;
        loop {
            match self.underlying.send(contents).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if matches!(err, LlmError::Cancelled) {
                        return Err(err);
                    }
                    if !self.underlying.is_retryable_error(&err) {
                        debug!(attempt, %err, "non-retryable error, giving up");
                        return Err(err);
                    }
                    if attempt >= self.config.max_attempts {
                        warn!(attempt, %err, "retry budget exhausted");
                        return Err(LlmError::RetriesExhausted {
                            attempts: self.config.max_attempts,
                            source: Box::new(err),
                        });
                    }
                    let wait = self.config.wait_time(backoff);
                    debug!(attempt, wait_ms = wait.as_millis() as u64, %err, "retrying after backoff");
                    tokio::time::sleep(wait).await;
                    backoff = self.config.next_backoff(backoff);
                    attempt += 1;
                }
            }
        }
    }

    async fn send_streaming(&mut self, contents: &[Content]) -> Result<ChatStream, LlmError> {
        self.underlying.send_streaming(contents).await
    }

    fn set_function_definitions(&mut self, defs: &[FunctionDefinition]) -> Result<(), LlmError> {
        self.underlying.set_function_definitions(defs)
    }

    fn is_retryable_error(&self, err: &LlmError) -> bool {
        self.underlying.is_retryable_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct FlakyChat {
        failures: u32,
        attempts: Arc<AtomicU32>,
        status: u16,
    }

    #[async_trait]
    impl Chat for FlakyChat {
        async fn send(&mut self, _contents: &[Content]) -> Result<ChatResponse, LlmError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(LlmError::api(self.status, "unavailable"))
            } else {
                Ok(ChatResponse::from_text("ok"))
            }
        }

        async fn send_streaming(&mut self, _contents: &[Content]) -> Result<ChatStream, LlmError> {
            unimplemented!("not exercised")
        }

        fn set_function_definitions(&mut self, _defs: &[FunctionDefinition]) -> Result<(), LlmError> {
            Ok(())
        }
    }

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_factor: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let chat = FlakyChat {
            failures: 2,
            attempts: attempts.clone(),
            status: 503,
        };
        let mut retry = RetryChat::new(Box::new(chat), config());

        let start = std::time::Instant::now();
        let response = retry.send(&["hi".into()]).await.expect("third attempt succeeds");
        assert_eq!(response.first().map(|c| c.text()), Some("ok".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two sleeps at 10ms and 20ms minimum.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let chat = FlakyChat {
            failures: 10,
            attempts: attempts.clone(),
            status: 500,
        };
        let mut retry = RetryChat::new(Box::new(chat), config());

        let err = retry.send(&["hi".into()]).await.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let chat = FlakyChat {
            failures: 10,
            attempts: attempts.clone(),
            status: 400,
        };
        let mut retry = RetryChat::new(Box::new(chat), config());

        let err = retry.send(&["hi".into()]).await.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(err, LlmError::Api { status: 400, .. }));
    }
}
