//! Per-request ceiling on storage calls.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::EngineError;

/// Counts storage calls made on behalf of one request. Shared by every
/// concurrent bucket merge of that request.
#[derive(Debug)]
pub struct OpBudget {
    limit: usize,
    used: AtomicUsize,
}

impl OpBudget {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Claim `ops` units, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BudgetExceeded`] when fewer than `ops` units
    /// remain; nothing is claimed in that case.
    pub fn try_acquire(&self, ops: usize) -> Result<(), EngineError> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(ops).filter(|&total| total <= self.limit)
            })
            .map(|_| ())
            .map_err(|used| EngineError::BudgetExceeded {
                used,
                limit: self.limit,
            })
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_until_limit() {
        let budget = OpBudget::new(5);
        budget.try_acquire(2).unwrap();
        budget.try_acquire(3).unwrap();
        assert_eq!(budget.remaining(), 0);
        assert!(matches!(
            budget.try_acquire(1),
            Err(EngineError::BudgetExceeded { used: 5, limit: 5 })
        ));
    }

    #[test]
    fn failed_acquire_claims_nothing() {
        let budget = OpBudget::new(3);
        budget.try_acquire(2).unwrap();
        assert!(budget.try_acquire(2).is_err());
        assert_eq!(budget.used(), 2);
        budget.try_acquire(1).unwrap();
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn zero_budget_rejects_everything_but_zero() {
        let budget = OpBudget::new(0);
        budget.try_acquire(0).unwrap();
        assert!(budget.try_acquire(1).is_err());
    }
}
