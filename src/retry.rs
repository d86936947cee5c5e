//! Retry and backoff decisions for catalog requests, kept as a pure state
//! machine so the policy is testable without a network.

use std::time::Duration;

use crate::config::FetchConfig;

/// Classification of a single request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// HTTP 200 with a body.
    Success,
    /// HTTP 401: credential invalid for the whole run.
    Unauthorized,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx or a transport-level failure.
    Transient,
    /// Any other HTTP status.
    Unexpected(u16),
}

pub fn classify_status(status: u16) -> AttemptOutcome {
    match status {
        200 => AttemptOutcome::Success,
        401 => AttemptOutcome::Unauthorized,
        429 => AttemptOutcome::RateLimited,
        500..=599 => AttemptOutcome::Transient,
        other => AttemptOutcome::Unexpected(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Done,
    RetryAfter(Duration),
    GiveUp(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    RateLimit,
    Network,
    Unexpected(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts allowed after a transient failure.
    pub max_network_retries: u32,
    /// Extra attempts allowed after an HTTP 429.
    pub max_rate_limit_retries: u32,
    /// Fixed cooldown applied after an HTTP 429.
    pub rate_limit_cooldown: Duration,
    /// First backoff delay for transient failures; doubles per retry.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_network_retries: config.max_network_retries,
            max_rate_limit_retries: config.max_rate_limit_retries,
            rate_limit_cooldown: config.rate_limit_cooldown,
            backoff_base: config.request_delay,
        }
    }
}

/// Per-request retry bookkeeping: attempt counters and the current backoff
/// delay. Feed each attempt's outcome in and act on the returned step.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    network_retries: u32,
    rate_limit_waits: u32,
    next_backoff: Duration,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            network_retries: 0,
            rate_limit_waits: 0,
            next_backoff: policy.backoff_base,
        }
    }

    pub fn rate_limit_waits(&self) -> u32 {
        self.rate_limit_waits
    }

    pub fn next_step(&mut self, outcome: AttemptOutcome, policy: &RetryPolicy) -> NextStep {
        match outcome {
            AttemptOutcome::Success => NextStep::Done,
            AttemptOutcome::Unauthorized => NextStep::GiveUp(FailureKind::Auth),
            AttemptOutcome::Unexpected(status) => {
                NextStep::GiveUp(FailureKind::Unexpected(status))
            }
            AttemptOutcome::RateLimited => {
                if self.rate_limit_waits >= policy.max_rate_limit_retries {
                    NextStep::GiveUp(FailureKind::RateLimit)
                } else {
                    self.rate_limit_waits += 1;
                    NextStep::RetryAfter(policy.rate_limit_cooldown)
                }
            }
            AttemptOutcome::Transient => {
                if self.network_retries >= policy.max_network_retries {
                    NextStep::GiveUp(FailureKind::Network)
                } else {
                    self.network_retries += 1;
                    let delay = self.next_backoff;
                    self.next_backoff = delay.saturating_mul(2);
                    NextStep::RetryAfter(delay)
                }
            }
        }
    }
}
