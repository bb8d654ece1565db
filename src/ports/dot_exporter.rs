//! DOT Exporter
//!
//! Renders a recorded trace as Graphviz DOT. Output depends only on the
//! store's registration order, so the same trace always yields the same text.

use crate::domain::invocation::Invocation;
use crate::domain::store::GraphStore;
use crate::ports::DiagramExporter;

/// Node id of the synthesized terminal node.
pub const RESULT_NODE: &str = "result";

#[derive(Debug, Clone, Default)]
pub struct DotExporter {
    /// Also draw return edges for calls that returned `None`.
    pub show_none_returns: bool,
}

impl DotExporter {
    pub fn new(show_none_returns: bool) -> Self {
        Self { show_none_returns }
    }

    /// Convert a GraphStore to a DOT string.
    pub fn to_dot(&self, store: &GraphStore) -> String {
        let mut lines = Vec::new();
        lines.push("digraph \"rc-graph\" {".to_string());

        // Nodes
        for record in store.iter() {
            lines.push(format!(
                "    {} [label=\"{}\", shape=Mrecord];",
                record.id,
                Self::node_label(record)
            ));
        }

        // Call edges, then left-to-right ordering of siblings
        for record in store.iter() {
            for edge in &record.children {
                lines.push(format!(
                    "    {} -> {} [label=\"(#{})\", color=black];",
                    record.id, edge.child, edge.call_order
                ));
            }
            if record.children.len() > 1 {
                let ids: Vec<String> = record.children.iter().map(|e| e.child.to_string()).collect();
                let chain: Vec<String> = ids
                    .windows(2)
                    .map(|pair| format!("{} -> {} [style=invis];", pair[0], pair[1]))
                    .collect();
                lines.push(format!(
                    "    subgraph {{ rank=same; {}; {} }}",
                    ids.join("; "),
                    chain.join(" ")
                ));
            }
        }

        // Return edges
        for record in store.iter() {
            for edge in &record.children {
                let Some(child) = store.get(edge.child) else { continue };
                if let Some(label) = self.return_label(child) {
                    lines.push(format!(
                        "    {} -> {} [dir=back, label=\"{}\", color=green, fontcolor=green, headport=c];",
                        record.id,
                        child.id,
                        Self::escape_label(&label)
                    ));
                }
            }
        }

        // Overall result of the entry call
        if let Some(root) = store.root() {
            if let (Some(ret), Some(step)) = (&root.ret, root.ret_step) {
                if !ret.is_none() {
                    lines.push(format!("    {} [label=\"Result\", shape=Mrecord];", RESULT_NODE));
                    lines.push(format!(
                        "    {} -> {} [dir=back, label=\"{}\", color=green, fontcolor=green, headport=c];",
                        RESULT_NODE,
                        root.id,
                        Self::escape_label(&format!("{} (#{})", ret, step))
                    ));
                }
            }
        }

        lines.push("}".to_string());
        lines.join("\n")
    }

    /// `value (#step)` for a completed call, honoring `show_none_returns`.
    fn return_label(&self, record: &Invocation) -> Option<String> {
        let ret = record.ret.as_ref()?;
        if ret.is_none() && !self.show_none_returns {
            return None;
        }
        let step = record.ret_step?;
        Some(format!("{} (#{})", ret, step))
    }

    /// `fib(3)`, or `{ fib(3) | memo: 2 }` when the call carries annotations.
    fn node_label(record: &Invocation) -> String {
        let call = Self::escape_record(&record.call_string());
        if record.annotations.is_empty() {
            return call;
        }
        let fields: Vec<String> = record
            .annotations
            .iter()
            .map(|(k, v)| Self::escape_record(&format!("{}: {}", k, v)))
            .collect();
        format!("{{ {} | {} }}", call, fields.join(" | "))
    }

    fn escape_label(label: &str) -> String {
        label
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
    }

    /// Escape for Mrecord labels, where braces, bars and angle brackets
    /// are field syntax.
    fn escape_record(label: &str) -> String {
        let mut out = String::with_capacity(label.len());
        for ch in Self::escape_label(label).chars() {
            if matches!(ch, '{' | '}' | '|' | '<' | '>') {
                out.push('\\');
            }
            out.push(ch);
        }
        out
    }
}

impl DiagramExporter for DotExporter {
    fn export(&self, store: &GraphStore) -> String {
        self.to_dot(store)
    }

    fn format_name(&self) -> &'static str {
        "dot"
    }
}
