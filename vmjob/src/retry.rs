use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};

/// How the wait between attempts evolves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { factor: u32, max: Duration },
}

/// Retry until success, until `max_attempts` ran, or until the deadline passes.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
    /// Upper bound on the whole loop, waits and attempts included.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(2),
            backoff: Backoff::Fixed,
            deadline: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: Option<E>,
    pub deadline_exceeded: bool,
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.last_error, self.deadline_exceeded) {
            (Some(err), false) => write!(f, "{}", err),
            (Some(err), true) => write!(f, "deadline exceeded, last error: {}", err),
            (None, _) => write!(f, "deadline exceeded before any attempt completed"),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval: Duration::ZERO,
            backoff: Backoff::Fixed,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Wait before attempt number `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max } => {
                let mut delay = self.interval;
                for _ in 1..attempt {
                    delay = delay.saturating_mul(factor);
                    if delay >= max {
                        return max;
                    }
                }
                delay.min(max)
            }
        }
    }

    pub async fn retry<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let deadline = self.deadline.map(|d| Instant::now() + d);
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            let outcome = match deadline {
                Some(deadline) => match time::timeout_at(deadline, op(attempt)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return Err(RetryError {
                            attempts: attempt,
                            last_error,
                            deadline_exceeded: true,
                        })
                    }
                },
                None => op(attempt).await,
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => last_error = Some(err),
            }
            if attempt == self.max_attempts {
                break;
            }
            let delay = self.delay_after(attempt);
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error,
                        deadline_exceeded: true,
                    });
                }
            }
            time::sleep(delay).await;
        }
        Err(RetryError {
            attempts: self.max_attempts,
            last_error,
            deadline_exceeded: false,
        })
    }
}
