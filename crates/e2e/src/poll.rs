//! Eventually-consistent assertions
//!
//! HMR updates land after an unknown delay (watcher debounce, rebuild,
//! patch application in the page). Assertions therefore re-read the value
//! until it matches or a deadline passes.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between two reads
    pub interval: Duration,

    /// Give up once this much time has passed after a miss
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a successful poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Poll `producer` until it yields `expected`.
pub async fn expect_eventually<T, F, Fut>(
    producer: F,
    expected: T,
    options: PollOptions,
) -> HarnessResult<PollResult<T>>
where
    T: PartialEq + Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
{
    let description = format!("{:?}", expected);
    expect_eventually_by(producer, |v| *v == expected, &description, options).await
}

/// Poll `producer` until `predicate` accepts its value.
///
/// Producer errors count as misses: the page may be mid-update when read.
/// The last error is reported if the deadline passes without a match.
pub async fn expect_eventually_by<T, F, Fut, P>(
    mut producer: F,
    predicate: P,
    description: &str,
    options: PollOptions,
) -> HarnessResult<PollResult<T>>
where
    T: Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let last_observed = match producer().await {
            Ok(value) if predicate(&value) => {
                let elapsed = start.elapsed();
                debug!("Matched {} after {} attempt(s)", description, attempts);
                return Ok(PollResult { value, attempts, elapsed });
            }
            Ok(value) => format!("{:?}", value),
            Err(e) => format!("error: {}", e),
        };

        let elapsed = start.elapsed();
        if elapsed >= options.timeout {
            return Err(HarnessError::AssertionTimeout {
                expected: description.to_string(),
                last_observed,
                elapsed_ms: elapsed.as_millis() as u64,
                attempts,
            });
        }

        sleep(options.interval).await;
    }
}

/// Predicate for text that must contain `needle`
pub fn contains(needle: &str) -> impl Fn(&Option<String>) -> bool + '_ {
    move |value| value.as_deref().is_some_and(|v| v.contains(needle))
}
