// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Bounded retry for API-style writes that can fail transiently
//! (optimistic-concurrency conflict, rate limit).

use std::future::Future;
use std::time::Duration;

/// Retry budget for one logical write: attempt count plus the shape of
/// the delays between attempts. Delays grow exponentially up to a cap,
/// with up to +50% random jitter so writers colliding on the same
/// object spread out instead of conflicting again in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // A handful of quick attempts; anything that stays in conflict
        // past ~1s is better served by the next watch event.
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy for status-subresource writes, sized by configuration.
    pub fn for_status_updates(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Jittered delay before retry number `attempt` (1-based).
    fn delay_before(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let jittered = base * (1.0 + rand::random::<f64>() * 0.5);
        Duration::from_secs_f64(jittered).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the
/// attempt budget is exhausted. `retryable` classifies errors; a conflict
/// or throttle predicate is the usual choice.
pub async fn retry_on<T, E, F, Fut, P>(policy: &RetryPolicy, retryable: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !retryable(&e) {
                    return Err(e);
                }
                tokio::time::sleep(policy.delay_before(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Conflict,
        Invalid,
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_on(
            &quick_policy(),
            |e| *e == TestError::Conflict,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Conflict)
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_on(
            &quick_policy(),
            |e| *e == TestError::Conflict,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Invalid) }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), TestError::Invalid);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_budget_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_on(
            &quick_policy(),
            |e| *e == TestError::Conflict,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Conflict) }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), TestError::Conflict);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
        };
        // First retry waits at least the initial delay, jitter included.
        assert!(policy.delay_before(1) >= Duration::from_millis(100));
        // Later retries hit the cap exactly.
        assert_eq!(policy.delay_before(4), Duration::from_millis(300));
        assert_eq!(policy.delay_before(8), Duration::from_millis(300));
    }

    #[test]
    fn test_for_status_updates_enforces_one_attempt() {
        assert_eq!(RetryPolicy::for_status_updates(0).max_attempts, 1);
        assert_eq!(RetryPolicy::for_status_updates(3).max_attempts, 3);
    }
}
