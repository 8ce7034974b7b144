//! Timeout and retry policy applied to every port call.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use hop_core::{ControllerConfig, HopError, Prompt, ReasoningPort, Result};

/// Per-call timeout plus a single retry after a fixed backoff.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallPolicy {
    timeout: Duration,
    backoff: Duration,
}

impl CallPolicy {
    pub(crate) fn from_config(config: &ControllerConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.call_timeout_ms),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Run `call` at most twice.
    ///
    /// Timeouts and retryable errors get one retry; fatal and non-retryable
    /// errors return immediately.
    pub(crate) async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => HopError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                },
            };

            if attempt >= 2 || !err.is_retryable() {
                return Err(err);
            }

            warn!("{} failed ({}), retrying in {:?}", operation, err, self.backoff);
            tokio::time::sleep(self.backoff).await;
        }
    }

    /// Complete `prompt` and parse the text, retrying once on failure.
    ///
    /// A parse failure counts as a failed call.
    pub(crate) async fn complete<M, T, P>(&self, reasoner: &M, prompt: &Prompt, parse: P) -> Result<T>
    where
        M: ReasoningPort + ?Sized,
        P: Fn(&str) -> Result<T>,
    {
        let parse = &parse;
        self.run(prompt.mode.as_str(), || async move {
            let completion = reasoner.complete(prompt).await?;
            parse(&completion.text)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(timeout_ms: u64) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(timeout_ms),
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = policy(1000)
            .run("search", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HopError::retrieval("flaky"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_second_failure() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<()> = policy(1000)
            .run("search", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HopError::retrieval("down"))
            })
            .await;
        assert!(matches!(result, Err(HopError::RetrievalUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<()> = policy(1000)
            .run("complete", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HopError::unauthenticated("bad key"))
            })
            .await;
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<()> = policy(5)
            .run("search", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(HopError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
