//! Trace Session
//!
//! The instrumentation hook. Every traced call goes through
//! [`TraceSession::invoke`], which records it in the [`GraphStore`], asks the
//! [`ResourceGuard`] whether the trace may continue, and keeps an explicit
//! stack of active invocations so the caller of each call is known without
//! inspecting the native stack.

use crate::domain::guard::{GuardError, ResourceGuard};
use crate::domain::invocation::InvocationId;
use crate::domain::store::GraphStore;
use crate::domain::value::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// State of one trace. Owned by exactly one caller and threaded as `&mut`
/// through every instrumented call.
#[derive(Debug)]
pub struct TraceSession {
    store: GraphStore,
    guard: ResourceGuard,
    active: Vec<InvocationId>,
}

impl TraceSession {
    pub fn new(max_invocations: usize, max_duration: Duration) -> Self {
        Self::with_guard(ResourceGuard::new(max_invocations, max_duration))
    }

    pub fn with_guard(guard: ResourceGuard) -> Self {
        Self {
            store: GraphStore::new(),
            guard,
            active: Vec::new(),
        }
    }

    /// Start over: empty store, fresh counters, restarted clock.
    pub fn reset(&mut self) {
        self.store.reset();
        self.active.clear();
        self.guard.arm();
    }

    /// Innermost instrumented invocation currently running.
    pub fn current(&self) -> Option<InvocationId> {
        self.active.last().copied()
    }

    /// Number of instrumented invocations currently on the stack.
    pub fn depth(&self) -> usize {
        self.active.len()
    }

    /// Run `body` as a traced call of `function`.
    ///
    /// The arguments are snapshotted before `body` runs; `body` itself works on
    /// the caller's original values. If the guard trips, `body` is never run
    /// and the error is returned. An error from `body` is returned unchanged
    /// and leaves the invocation recorded without a return value.
    pub fn invoke<R, E, F>(
        &mut self,
        function: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        body: F,
    ) -> Result<R, E>
    where
        R: Clone + Into<Value>,
        E: From<GuardError>,
        F: FnOnce(&mut TraceSession) -> Result<R, E>,
    {
        let caller = self.current();
        let id = self.store.register(caller, function, args, kwargs);
        debug!(id = id.0, caller = ?caller.map(|c| c.0), function, "enter");

        if let Err(err) = self.guard.check(&self.store) {
            warn!(id = id.0, error = %err, "trace aborted");
            return Err(err.into());
        }

        self.active.push(id);
        let outcome = body(self);
        let popped = self.active.pop();
        debug_assert_eq!(popped, Some(id));

        let ret = outcome?;
        self.store.complete(id, &ret.clone().into());
        debug!(id = id.0, function, "return");
        Ok(ret)
    }

    /// Attach `key: value` to the innermost active invocation.
    /// Returns `false` when no invocation is active.
    pub fn annotate(&mut self, key: &str, value: &Value) -> bool {
        match self.current() {
            Some(id) => {
                self.store.annotate(id, key, value);
                true
            }
            None => false,
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Check the limits without recording a call. Long-running loops use
    /// this so a trace stuck in one invocation still hits the time limit.
    pub fn check_limits(&self) -> Result<(), GuardError> {
        self.guard.check(&self.store)
    }

    pub fn into_store(self) -> GraphStore {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fib(s: &mut TraceSession, n: i64) -> Result<i64, GuardError> {
        s.invoke("fib", &[Value::Int(n)], &[], |s| {
            if n < 2 {
                Ok(n)
            } else {
                Ok(fib(s, n - 1)? + fib(s, n - 2)?)
            }
        })
    }

    #[test]
    fn test_records_one_node_per_call() {
        let mut session = TraceSession::new(1000, Duration::from_secs(10));
        assert_eq!(fib(&mut session, 4), Ok(3));
        assert_eq!(session.store().len(), 9);
        assert_eq!(session.depth(), 0);

        let root = session.store().root().unwrap();
        assert_eq!(root.call_string(), "fib(4)");
        assert_eq!(root.ret, Some(Value::Int(3)));
    }

    #[test]
    fn test_guard_stops_before_body() {
        let mut session = TraceSession::new(3, Duration::from_secs(10));
        let result = fib(&mut session, 5);
        assert_eq!(result, Err(GuardError::TooManyInvocations { limit: 3 }));

        // The fourth record exists but its body never ran.
        let store = session.store();
        assert_eq!(store.len(), 4);
        assert!(store.iter().all(|r| r.ret.is_none()));
        assert_eq!(session.depth(), 0);
    }

    #[test]
    fn test_uninstrumented_helpers_are_transparent() {
        fn helper(s: &mut TraceSession, n: i64) -> Result<i64, GuardError> {
            // Not instrumented: the child below still belongs to `outer`.
            leaf(s, n + 1)
        }
        fn leaf(s: &mut TraceSession, n: i64) -> Result<i64, GuardError> {
            s.invoke("leaf", &[Value::Int(n)], &[], |_| Ok(n))
        }

        let mut session = TraceSession::new(10, Duration::from_secs(10));
        let out = session.invoke("outer", &[], &[], |s| helper(s, 1));
        assert_eq!(out, Ok(2));
        let store = session.store();
        assert_eq!(store.root().unwrap().children.len(), 1);
    }

    #[test]
    fn test_body_error_leaves_record_incomplete() {
        #[derive(Debug, PartialEq)]
        enum Boom {
            Guard,
            Body,
        }
        impl From<GuardError> for Boom {
            fn from(_: GuardError) -> Self {
                Boom::Guard
            }
        }

        let mut session = TraceSession::new(10, Duration::from_secs(10));
        let out: Result<i64, Boom> = session.invoke("f", &[], &[], |s| {
            s.invoke("g", &[], &[], |_| Err::<i64, Boom>(Boom::Body))
        });
        assert_eq!(out, Err(Boom::Body));
        assert_eq!(session.store().len(), 2);
        assert!(session.store().iter().all(|r| !r.is_complete()));
    }

    #[test]
    fn test_check_limits_between_calls() {
        let mut session = TraceSession::new(10, Duration::from_millis(20));
        let out = session.invoke("f", &[], &[], |s| {
            std::thread::sleep(Duration::from_millis(40));
            s.check_limits()
        });
        // The entry check passed; the clock ran out inside the body.
        assert!(matches!(out, Err(GuardError::TooMuchTime { .. })));
        assert_eq!(session.store().len(), 1);
    }

    #[test]
    fn test_annotate_targets_innermost_call() {
        let mut session = TraceSession::new(10, Duration::from_secs(10));
        assert!(!session.annotate("x", &Value::Int(0)));
        let _ = session.invoke("f", &[], &[], |s| {
            s.annotate("depth", &Value::Int(0));
            s.invoke("g", &[], &[], |s| {
                s.annotate("depth", &Value::Int(1));
                Ok::<_, GuardError>(())
            })
        });
        let records: Vec<_> = session.store().iter().collect();
        assert_eq!(records[0].annotations, vec![("depth".to_string(), Value::Int(0))]);
        assert_eq!(records[1].annotations, vec![("depth".to_string(), Value::Int(1))]);
    }
}
