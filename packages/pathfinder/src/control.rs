//! Cancellation and deadlines for long-running searches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::{SearchError, TimeoutReason};

/// How many steps pass between deadline checks.
const CLOCK_CHECK_INTERVAL: usize = 64;

/// Shared flag a caller can set to stop a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Caller-side limits for one search.
#[derive(Debug, Clone, Default)]
pub struct SearchControl {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl SearchControl {
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Polls a [`SearchControl`] and counts work against an expansion budget.
pub(crate) struct Watchdog<'a> {
    control: &'a SearchControl,
    budget: Option<usize>,
    steps: usize,
    expansions: usize,
}

impl<'a> Watchdog<'a> {
    pub(crate) const fn new(control: &'a SearchControl, budget: Option<usize>) -> Self {
        Self {
            control,
            budget,
            steps: 0,
            expansions: 0,
        }
    }

    pub(crate) const fn expansions(&self) -> usize {
        self.expansions
    }

    /// Called once per unit of work.
    pub(crate) fn tick(&mut self) -> Result<(), SearchError> {
        self.steps += 1;
        if self
            .control
            .cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
        {
            return Err(SearchError::Timeout(TimeoutReason::Cancelled));
        }
        if self.steps % CLOCK_CHECK_INTERVAL == 1
            && self.control.deadline.is_some_and(|d| Instant::now() >= d)
        {
            return Err(SearchError::Timeout(TimeoutReason::Deadline));
        }
        Ok(())
    }

    /// Called once per expanded label.
    pub(crate) fn expand(&mut self) -> Result<(), SearchError> {
        self.expansions += 1;
        if self.budget.is_some_and(|b| self.expansions > b) {
            return Err(SearchError::Timeout(TimeoutReason::ExpansionBudget));
        }
        Ok(())
    }
}
