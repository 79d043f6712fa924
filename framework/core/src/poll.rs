use std::future::Future;
use std::time::Duration;

/// How often and how many times a convergence check runs before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Same attempt ceiling with no sleeping between attempts.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, max_attempts)
    }

    /// The longest this policy can wait in total.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// The result of one convergence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    /// Not there yet, with a short description of the observed status.
    Pending(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("{what} did not converge after {attempts} attempts, last status: {last_status}")]
    Exhausted {
        what: String,
        attempts: u32,
        last_status: String,
    },
    #[error("{what} failed on attempt {attempt}")]
    Failed {
        what: String,
        attempt: u32,
        #[source]
        source: anyhow::Error,
    },
}

impl PollError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PollError::Exhausted { .. })
    }
}

/// Run `check` until it returns [Poll::Ready] or the attempt ceiling is reached.
///
/// The closure receives the 1-based attempt number. An `Err` from the closure stops polling
/// immediately; map transient errors to [Poll::Pending] inside the closure if they should be
/// retried. There is no sleep after the final attempt.
pub async fn poll<T, F, Fut>(what: &str, policy: PollPolicy, mut check: F) -> Result<T, PollError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Poll<T>>>,
{
    let mut last_status = String::from("never checked");

    for attempt in 1..=policy.max_attempts {
        match check(attempt).await {
            Ok(Poll::Ready(value)) => {
                log::debug!("{what} ready after {attempt} attempt(s)");
                return Ok(value);
            }
            Ok(Poll::Pending(status)) => {
                log::debug!(
                    "{what} pending ({attempt}/{max}): {status}",
                    max = policy.max_attempts
                );
                last_status = status;
            }
            Err(source) => {
                return Err(PollError::Failed {
                    what: what.to_string(),
                    attempt,
                    source,
                });
            }
        }

        if attempt < policy.max_attempts && !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(PollError::Exhausted {
        what: what.to_string(),
        attempts: policy.max_attempts,
        last_status,
    })
}
