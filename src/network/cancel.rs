use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ExecutionError, KyroFactResult};

/// A shared cancellation flag.
///
/// Clones observe the same flag. Long-running loops call [`check`](Self::check)
/// between steps and stop with [`ExecutionError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once `cancel` has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with `Cancelled` once cancellation was requested.
    pub fn check(&self) -> KyroFactResult<()> {
        if self.is_cancelled() {
            return Err(ExecutionError::Cancelled.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        let err = token.check().unwrap_err();
        assert!(err.is_execution());
    }
}
