//! Per-run call accounting.
//!
//! The controller wraps the shared generation service in a
//! [`MeteredService`] for each run. Every call goes through it, so its
//! counter is the authoritative "API calls used" figure no matter which
//! stage issued the call.

use crate::service::{GenerationService, Prompt, Reply, ServiceError};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A hard cap on generation calls plus a running counter.
#[derive(Debug)]
pub struct CallBudget {
    limit: usize,
    used: AtomicUsize,
}

impl CallBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }

    /// Whether `calls` more calls fit while still leaving `reserved` calls
    /// for stages that must run later.
    pub fn can_afford(&self, calls: usize, reserved: usize) -> bool {
        self.remaining() >= calls + reserved
    }

    /// Claim one call. Returns false once the limit is reached.
    fn try_spend(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }
}

/// The generation service as seen by one pipeline run.
pub struct MeteredService {
    inner: Arc<dyn GenerationService>,
    budget: CallBudget,
}

impl MeteredService {
    pub fn new(inner: Arc<dyn GenerationService>, limit: usize) -> Self {
        Self {
            inner,
            budget: CallBudget::new(limit),
        }
    }

    pub fn budget(&self) -> &CallBudget {
        &self.budget
    }

    /// Issue one call. The call is counted before it is sent, so a call that
    /// fails still consumes budget.
    pub async fn complete(&self, prompt: &Prompt) -> Result<String, ServiceError> {
        if !self.budget.try_spend() {
            return Err(ServiceError::BudgetExhausted {
                limit: self.budget.limit(),
            });
        }
        debug!(
            role = prompt.role.as_str(),
            temperature = prompt.temperature,
            calls_used = self.budget.used(),
            "generation call"
        );
        self.inner.complete(prompt).await
    }

    /// Issue one call and parse the reply as JSON.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        prompt: &Prompt,
    ) -> Result<Reply<T>, ServiceError> {
        let raw = self.complete(prompt).await?;
        Ok(Reply::parse(&raw))
    }
}
