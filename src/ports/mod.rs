use crate::domain::ast::{Expr, Program};
use crate::domain::store::GraphStore;
use crate::infrastructure::lexer::SyntaxError;

pub mod dot_exporter;
pub mod text_exporter;

/// Turns definition source and entry text into something the interpreter runs.
pub trait ProgramParser: Sync {
    fn parse_program(&self, source: &str) -> Result<Program, SyntaxError>;
    fn parse_entry(&self, source: &str) -> Result<Expr, SyntaxError>;
}

/// Renders a recorded trace.
pub trait DiagramExporter: Sync {
    fn export(&self, store: &GraphStore) -> String;
    fn format_name(&self) -> &'static str;
}
