//! Tracing plain Rust functions through the same hook the interpreter uses.

use std::time::Duration;

use recurviz::application::trace;
use recurviz::domain::guard::GuardError;
use recurviz::domain::session::TraceSession;
use recurviz::domain::value::Value;
use recurviz::ports::dot_exporter::DotExporter;

fn fib(session: &mut TraceSession, n: i64) -> Result<i64, GuardError> {
    session.invoke("fib", &[Value::Int(n)], &[], |s| {
        if n < 2 {
            return Ok(n);
        }
        Ok(fib(s, n - 1)? + fib(s, n - 2)?)
    })
}

fn reverse(session: &mut TraceSession, items: &Value, i: i64, j: i64) -> Result<(), GuardError> {
    session.invoke("rev", &[items.clone(), Value::Int(i), Value::Int(j)], &[], |s| {
        if i < j {
            if let Value::List(cells) = items {
                cells.borrow_mut().swap(i as usize, j as usize);
            }
            reverse(s, items, i + 1, j - 1)?;
        }
        Ok(())
    })
}

#[test]
fn test_native_matches_interpreted() {
    let mut session = TraceSession::new(1000, Duration::from_secs(10));
    assert_eq!(fib(&mut session, 2), Ok(1));
    let native = DotExporter::default().to_dot(session.store());

    let interpreted = trace(
        "def fib(n):\n    if n < 2:\n        return n\n    return fib(n - 1) + fib(n - 2)\n",
        "fib(2)",
    )
    .unwrap();
    assert_eq!(native, interpreted);
}

#[test]
fn test_native_snapshots() {
    let mut session = TraceSession::new(1000, Duration::from_secs(10));
    let items = Value::from(vec![1, 2, 3, 4, 5]);
    reverse(&mut session, &items, 0, 4).unwrap();

    assert_eq!(items.to_string(), "[5, 4, 3, 2, 1]");
    let labels: Vec<String> = session.store().iter().map(|r| r.call_string()).collect();
    assert_eq!(
        labels,
        vec![
            "rev([1, 2, 3, 4, 5], 0, 4)",
            "rev([5, 2, 3, 4, 1], 1, 3)",
            "rev([5, 4, 3, 2, 1], 2, 2)",
        ]
    );
}

#[test]
fn test_reset_between_traces() {
    let mut session = TraceSession::new(10, Duration::from_secs(10));
    assert!(fib(&mut session, 3).is_ok());
    assert_eq!(session.store().len(), 5);

    session.reset();
    assert!(session.store().is_empty());
    assert_eq!(fib(&mut session, 1), Ok(1));
    assert_eq!(session.store().root().unwrap().ret_step, Some(2));

    session.reset();
    assert_eq!(fib(&mut session, 10), Err(GuardError::TooManyInvocations { limit: 10 }));
}
