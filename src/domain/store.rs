//! Graph Store
//!
//! Owns the invocation records of one trace and the three session counters.
//! Writes are append-only, so a trace aborted halfway still leaves a valid
//! graph behind for inspection.

use crate::domain::invocation::{ChildEdge, Invocation, InvocationId};
use crate::domain::value::Value;

/// Records and counters for a single trace session.
#[derive(Debug, Clone)]
pub struct GraphStore {
    records: Vec<Invocation>,
    call_order: u64,
    unwind_order: u64,
    step: u64,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            call_order: 1,
            unwind_order: 1,
            step: 1,
        }
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record and put the counters back to their initial values.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a new invocation. Arguments are deep-copied here, so the
    /// snapshot reflects the moment of the call.
    pub fn register(
        &mut self,
        caller: Option<InvocationId>,
        function: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> InvocationId {
        let id = InvocationId(self.records.len() as u64 + 1);
        let args = args.iter().map(Value::deep_copy).collect();
        let kwargs = kwargs
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_copy()))
            .collect();
        let mut record = Invocation::new(id, function, args, kwargs);

        let call_order = self.call_order;
        if let Some(parent) = caller.and_then(|c| self.get_mut(c)) {
            parent.children.push(ChildEdge {
                child: id,
                call_order,
                unwind_order: None,
            });
            record.parent = Some(parent.id);
            self.call_order += 1;
        }
        self.records.push(record);
        self.step += 1;
        id
    }

    /// Mark an invocation as returned with a deep copy of its result.
    /// Completing an unknown or already completed invocation is a no-op.
    pub fn complete(&mut self, id: InvocationId, ret: &Value) {
        let step = self.step;
        let parent = match self.get_mut(id) {
            Some(record) if !record.is_complete() => {
                record.ret = Some(ret.deep_copy());
                record.ret_step = Some(step);
                record.parent
            }
            _ => return,
        };

        let unwind = self.unwind_order;
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            // Children are pushed in id order.
            if let Ok(idx) = parent.children.binary_search_by_key(&id, |e| e.child) {
                parent.children[idx].unwind_order = Some(unwind);
            }
            self.unwind_order += 1;
        }
        self.step += 1;
    }

    /// Attach an annotation to a recorded invocation.
    pub fn annotate(&mut self, id: InvocationId, key: &str, value: &Value) {
        if let Some(record) = self.get_mut(id) {
            record.annotate(key, value.deep_copy());
        }
    }

    /// Records in registration order (pre-order of the call tree).
    pub fn iter(&self) -> impl Iterator<Item = &Invocation> {
        self.records.iter()
    }

    pub fn get(&self, id: InvocationId) -> Option<&Invocation> {
        let idx = id.0.checked_sub(1)? as usize;
        self.records.get(idx)
    }

    fn get_mut(&mut self, id: InvocationId) -> Option<&mut Invocation> {
        let idx = id.0.checked_sub(1)? as usize;
        self.records.get_mut(idx)
    }

    /// The first registered invocation.
    pub fn root(&self) -> Option<&Invocation> {
        self.records.first()
    }

    /// The invocation whose child edges contain `id`.
    pub fn parent_of(&self, id: InvocationId) -> Option<InvocationId> {
        self.get(id)?.parent
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next call-order value to be handed out.
    pub fn call_order(&self) -> u64 {
        self.call_order
    }

    /// Next unwind-order value to be handed out.
    pub fn unwind_order(&self) -> u64 {
        self.unwind_order
    }

    pub fn step(&self) -> u64 {
        self.step
    }
}
