// Invocation records for recurviz.
// One record per traced call, with the edges to the calls it made.

use crate::domain::value::Value;
use std::fmt;

/// Identifier of one recorded invocation. Assigned from 1 in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InvocationId(pub u64);

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Edge from a caller's record to one of its child calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEdge {
    pub child: InvocationId,
    /// Call-order counter when the child was called.
    pub call_order: u64,
    /// Unwind-order counter when the child returned; `None` while it is running
    /// or if it never returned.
    pub unwind_order: Option<u64>,
}

/// A recorded call of an instrumented function.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: InvocationId,
    /// The instrumented caller, `None` for the root.
    pub parent: Option<InvocationId>,
    pub function: String,
    /// Positional arguments, deep-copied at call entry.
    pub args: Vec<Value>,
    /// Keyword arguments, deep-copied at call entry, in call order.
    pub kwargs: Vec<(String, Value)>,
    /// Deep copy of the return value, `None` until the call completes.
    pub ret: Option<Value>,
    /// Step counter value at completion.
    pub ret_step: Option<u64>,
    pub children: Vec<ChildEdge>,
    /// User-attached `key: value` pairs shown inside the node.
    pub annotations: Vec<(String, Value)>,
}

impl Invocation {
    pub fn new(id: InvocationId, function: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Self {
        Self {
            id,
            parent: None,
            function: function.to_string(),
            args,
            kwargs,
            ret: None,
            ret_step: None,
            children: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.ret.is_some()
    }

    /// Positional arguments followed by `key: value` keyword arguments.
    pub fn arg_string(&self) -> String {
        self.args
            .iter()
            .map(|a| a.to_string())
            .chain(self.kwargs.iter().map(|(k, v)| format!("{}: {}", k, v)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `fib(3)` style call text.
    pub fn call_string(&self) -> String {
        format!("{}({})", self.function, self.arg_string())
    }

    /// Attach or replace an annotation.
    pub fn annotate(&mut self, key: &str, value: Value) {
        match self.annotations.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.annotations.push((key.to_string(), value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_string_positional_then_keyword() {
        let inv = Invocation::new(
            InvocationId(1),
            "walk",
            vec![Value::from(vec![1, 2]), Value::Int(0)],
            vec![("depth".to_string(), Value::Int(3))],
        );
        assert_eq!(inv.call_string(), "walk([1, 2], 0, depth: 3)");
    }

    #[test]
    fn test_annotate_replaces_existing_key() {
        let mut inv = Invocation::new(InvocationId(1), "f", vec![], vec![]);
        inv.annotate("seen", Value::Int(1));
        inv.annotate("memo", Value::Int(2));
        inv.annotate("seen", Value::Int(5));
        assert_eq!(inv.annotations.len(), 2);
        assert_eq!(inv.annotations[0], ("seen".to_string(), Value::Int(5)));
    }
}
