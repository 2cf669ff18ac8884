use std::future::Future;
use std::time::Duration;

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Returned when every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Retry without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Run `op` with attempt numbers `1..=max_attempts` until it succeeds.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_recovery(op, |_| async {}).await
    }

    /// Like [`run`](Self::run), but calls `recover(attempt)` after every failed
    /// attempt that will be followed by another one. Recovery never runs after
    /// the final attempt.
    pub async fn run_with_recovery<T, E, F, Fut, R, RFut>(
        &self,
        mut op: F,
        mut recover: R,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(u32) -> RFut,
        RFut: Future<Output = ()>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(last) if self.is_last(attempt) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(_) => {
                    recover(attempt).await;
                    if !self.delay.is_zero() {
                        tracing::debug!(
                            attempt,
                            delay_secs = self.delay.as_secs_f64(),
                            "Waiting before next attempt"
                        );
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
