use serde::{Serialize, Deserialize};
use crate::domain::store::GraphStore;
use crate::domain::value::Value;
use crate::ports::DiagramExporter;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct GraphDto {
    pub nodes: Vec<NodeDto>,
    pub edges: Vec<EdgeDto>,
}

#[derive(Debug, Serialize)]
pub struct NodeDto {
    pub id: u64,
    pub label: String,
    pub function: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<KeywordDto>,
    pub ret: Option<Value>,
    pub ret_step: Option<u64>,
    pub annotations: Vec<KeywordDto>,
}

#[derive(Debug, Serialize)]
pub struct KeywordDto {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EdgeDto {
    pub from: u64,
    pub to: u64,
    pub call_order: u64,
    pub unwind_order: Option<u64>,
}

fn keywords(pairs: &[(String, Value)]) -> Vec<KeywordDto> {
    pairs
        .iter()
        .map(|(name, value)| KeywordDto { name: name.clone(), value: value.clone() })
        .collect()
}

impl From<&GraphStore> for GraphDto {
    fn from(store: &GraphStore) -> Self {
        let nodes = store
            .iter()
            .map(|r| NodeDto {
                id: r.id.0,
                label: r.call_string(),
                function: r.function.clone(),
                args: r.args.clone(),
                kwargs: keywords(&r.kwargs),
                ret: r.ret.clone(),
                ret_step: r.ret_step,
                annotations: keywords(&r.annotations),
            })
            .collect();

        let mut edges = Vec::new();
        for record in store.iter() {
            for edge in &record.children {
                edges.push(EdgeDto {
                    from: record.id.0,
                    to: edge.child.0,
                    call_order: edge.call_order,
                    unwind_order: edge.unwind_order,
                });
            }
        }

        GraphDto { nodes, edges }
    }
}

/// Pretty-printed JSON form of a trace, for front ends that draw their own view.
pub struct JsonExporter;

impl DiagramExporter for JsonExporter {
    fn export(&self, store: &GraphStore) -> String {
        match serde_json::to_string_pretty(&GraphDto::from(store)) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, records = store.len(), "JSON export failed");
                String::new()
            }
        }
    }

    fn format_name(&self) -> &'static str {
        "json"
    }
}
