//! Retry policy for activity delivery
//!
//! `Deliverer` is deliberately single-attempt. `RetryingDeliverer`
//! layers bounded exponential backoff and an optional dead-letter sink
//! on top, so retry policy can change without touching signing or
//! transport logic.

use crate::activity::Activity;
use crate::actor::Actor;
use crate::config::RetryConfig;
use crate::delivery::Deliverer;
use crate::error::{FederationError, Result};
use crate::keys::SigningKey;
use std::time::Duration;
use tokio::sync::mpsc;

/// Bounded exponential backoff settings
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for the backoff delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1),
    /// capped at `max_delay`
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 1u64 << exponent;
        self.base_delay
            .checked_mul(factor as u32)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

/// Delivery that exhausted its attempts
#[derive(Debug)]
pub struct DeadLetter {
    pub inbox: String,
    pub activity: Activity,
    pub attempts: u32,
    pub last_error: String,
}

/// Deliverer wrapper applying a retry policy
///
/// Only delivery failures (transport or non-2xx inbox responses) are
/// retried; local failures like bad key material or a forbidden target
/// will not improve with repetition and surface immediately.
pub struct RetryingDeliverer {
    inner: Deliverer,
    policy: RetryPolicy,
    dead_letter: Option<mpsc::Sender<DeadLetter>>,
}

fn is_retryable(err: &FederationError) -> bool {
    matches!(err, FederationError::Delivery { .. })
}

impl RetryingDeliverer {
    pub fn new(inner: Deliverer, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            dead_letter: None,
        }
    }

    /// Attach a dead-letter sink receiving deliveries that exhausted
    /// every attempt
    pub fn with_dead_letter(mut self, sink: mpsc::Sender<DeadLetter>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// Deliver with retries per the policy
    ///
    /// # Errors
    /// The last delivery error once attempts are exhausted, after the
    /// dead letter (if a sink is attached) has been pushed.
    pub async fn deliver_to_actor(
        &self,
        signing_key: &SigningKey,
        activity: &Activity,
        target: &Actor,
    ) -> Result<()> {
        let mut last_error: Option<FederationError> = None;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let delay = self.policy.delay_before_retry(attempt - 1);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    inbox = %target.inbox,
                    "Backing off before delivery retry"
                );
                tokio::time::sleep(delay).await;
            }

            match self
                .inner
                .deliver_to_actor(signing_key, activity, target)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if is_retryable(&err) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        inbox = %target.inbox,
                        error = %err,
                        "Delivery attempt failed"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        // Attempts exhausted
        let err = match last_error {
            Some(err) => err,
            None => FederationError::Delivery {
                inbox: target.inbox.to_string(),
                status: None,
                reason: "no delivery attempts were made".to_string(),
            },
        };

        if let Some(sink) = &self.dead_letter {
            let dead_letter = DeadLetter {
                inbox: target.inbox.to_string(),
                activity: activity.clone(),
                attempts: self.policy.max_attempts,
                last_error: err.to_string(),
            };
            if sink.send(dead_letter).await.is_err() {
                tracing::warn!(inbox = %target.inbox, "Dead-letter sink closed, dropping entry");
            }
        }

        Err(err)
    }
}
