use crate::domain::errors::TrainingError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cooperative cancellation shared between a training caller and its workers.
///
/// Long-running loops call [`CancellationToken::check`] between discrete
/// units of work (per node, per feature, per job, per fold). Clones share the
/// same flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
    budget: Option<Duration>,
}

impl CancellationToken {
    /// A token that only stops on an explicit [`cancel`](Self::cancel).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
            budget: None,
        }
    }

    /// A token that also expires once `budget` has elapsed from now.
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(budget),
            budget: Some(budget),
        }
    }

    /// Shares this token's flag but also expires after `budget`, keeping the
    /// parent's deadline if it is earlier.
    pub fn child_with_budget(&self, budget: Duration) -> Self {
        let own = Instant::now().checked_add(budget);
        let (deadline, budget) = match (self.deadline, own) {
            (Some(parent), Some(own)) if parent <= own => (Some(parent), self.budget),
            (_, Some(own)) => (Some(own), Some(budget)),
            (parent, None) => (parent, self.budget),
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline,
            budget,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Returns `Err` when the work should stop.
    pub fn check(&self) -> Result<(), TrainingError> {
        if self.is_cancelled() {
            return Err(TrainingError::Cancelled);
        }
        if self.is_expired() {
            let budget_ms = self.budget.map(|b| b.as_millis() as u64).unwrap_or(0);
            return Err(TrainingError::Timeout { budget_ms });
        }
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancellationToken::new();
        let worker_view = token.clone();

        assert!(worker_view.check().is_ok());
        token.cancel();
        assert!(matches!(worker_view.check(), Err(TrainingError::Cancelled)));
    }

    #[test]
    fn test_expired_budget_reports_timeout() {
        let token = CancellationToken::with_budget(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));

        match token.check() {
            Err(TrainingError::Timeout { budget_ms }) => assert_eq!(budget_ms, 0),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_child_keeps_tighter_parent_deadline() {
        let parent = CancellationToken::with_budget(Duration::from_millis(5));
        let child = parent.child_with_budget(Duration::from_secs(300));
        assert_eq!(child.budget(), Some(Duration::from_millis(5)));

        let loose = CancellationToken::new().child_with_budget(Duration::from_secs(300));
        assert_eq!(loose.budget(), Some(Duration::from_secs(300)));

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_unbounded_token_never_expires() {
        let token = CancellationToken::new();
        assert!(!token.is_expired());
        assert!(token.budget().is_none());
    }
}
