use crate::domain::invocation::InvocationId;
use crate::domain::store::GraphStore;
use crate::ports::DiagramExporter;

/// Plain-text outline of a trace, one indented line per invocation:
///
/// ```text
/// 1 = fib(2)
///   1 = fib(1)  (#1)
///   0 = fib(0)  (#2)
/// ```
///
/// Calls that never returned show `?` in place of a value.
pub struct TextExporter;

impl TextExporter {
    fn walk(store: &GraphStore, id: InvocationId, depth: usize, order: Option<u64>, out: &mut Vec<String>) {
        let Some(record) = store.get(id) else { return };
        let ret = record
            .ret
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_string());
        let mut line = format!("{}{} = {}", "  ".repeat(depth), ret, record.call_string());
        if let Some(n) = order {
            line.push_str(&format!("  (#{})", n));
        }
        for (key, value) in &record.annotations {
            line.push_str(&format!("  [{}: {}]", key, value));
        }
        out.push(line);
        for edge in &record.children {
            Self::walk(store, edge.child, depth + 1, Some(edge.call_order), out);
        }
    }
}

impl DiagramExporter for TextExporter {
    fn export(&self, store: &GraphStore) -> String {
        let mut lines = Vec::new();
        if let Some(root) = store.root() {
            Self::walk(store, root.id, 0, None, &mut lines);
        }
        lines.join("\n")
    }

    fn format_name(&self) -> &'static str {
        "text"
    }
}
