//! Run-wide stop conditions: an optional wall-clock deadline and a
//! cancellation flag that can be raised from another task (e.g. Ctrl-C).
//!
//! Crawl and probe loops poll `exhausted()` between steps; a step already in
//! flight always runs to completion.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
pub struct RunBudget {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

/// Why a loop stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    DeadlineReached,
}

impl RunBudget {
    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_deadline(limit: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + limit),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Relaxed);
    }

    pub fn exhausted(&self) -> Option<StopReason> {
        if self.cancelled.load(Relaxed) {
            return Some(StopReason::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(StopReason::DeadlineReached),
            _ => None,
        }
    }

    /// Time left before the deadline, `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for RunBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_exhausts() {
        let budget = RunBudget::unlimited();
        assert_eq!(budget.exhausted(), None);
        assert_eq!(budget.remaining(), None);
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let budget = RunBudget::unlimited();
        let clone = budget.clone();
        clone.cancel();
        assert_eq!(budget.exhausted(), Some(StopReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let budget = RunBudget::with_deadline(Duration::from_secs(2));
        assert_eq!(budget.exhausted(), None);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(budget.exhausted(), Some(StopReason::DeadlineReached));
        assert_eq!(budget.remaining(), Some(Duration::ZERO));
    }
}
