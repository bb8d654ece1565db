// Resource guard for recurviz.
// Bounds one trace session by invocation count and wall-clock time.

use crate::domain::store::GraphStore;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that abort a whole trace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Encountered more than {limit} invocations while executing function")]
    TooManyInvocations { limit: usize },

    #[error("Took more than {limit:?} to run function")]
    TooMuchTime { limit: Duration },
}

/// Checks the session limits at every call entry.
#[derive(Debug, Clone)]
pub struct ResourceGuard {
    max_invocations: usize,
    max_duration: Duration,
    started: Instant,
}

impl ResourceGuard {
    pub fn new(max_invocations: usize, max_duration: Duration) -> Self {
        Self {
            max_invocations,
            max_duration,
            started: Instant::now(),
        }
    }

    /// Restart the clock. Called when a new trace begins.
    pub fn arm(&mut self) {
        self.started = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self, store: &GraphStore) -> Result<(), GuardError> {
        if store.len() > self.max_invocations {
            return Err(GuardError::TooManyInvocations {
                limit: self.max_invocations,
            });
        }
        if self.elapsed() > self.max_duration {
            return Err(GuardError::TooMuchTime {
                limit: self.max_duration,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::Value;

    #[test]
    fn test_count_limit_is_inclusive() {
        let guard = ResourceGuard::new(2, Duration::from_secs(60));
        let mut store = GraphStore::new();
        let root = store.register(None, "f", &[], &[]);
        store.register(Some(root), "f", &[Value::Int(1)], &[]);
        assert!(guard.check(&store).is_ok());

        store.register(Some(root), "f", &[Value::Int(2)], &[]);
        assert_eq!(
            guard.check(&store),
            Err(GuardError::TooManyInvocations { limit: 2 })
        );
    }

    #[test]
    fn test_time_limit() {
        let guard = ResourceGuard::new(100, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        let store = GraphStore::new();
        assert!(matches!(guard.check(&store), Err(GuardError::TooMuchTime { .. })));
    }

    #[test]
    fn test_arm_restarts_clock() {
        let mut guard = ResourceGuard::new(100, Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(60));
        guard.arm();
        assert!(guard.check(&GraphStore::new()).is_ok());
    }
}
