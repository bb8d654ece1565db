// Infrastructure implementations for recurviz.

pub mod config;
pub mod interpreter;
pub mod lexer;
pub mod parser;

use crate::domain::ast::{Expr, Program};
use crate::ports::ProgramParser;
use lexer::SyntaxError;

/// Parser for the indentation-based recursion-demo language.
pub struct IndentParser;

impl ProgramParser for IndentParser {
    fn parse_program(&self, source: &str) -> Result<Program, SyntaxError> {
        parser::parse_program(source)
    }

    fn parse_entry(&self, source: &str) -> Result<Expr, SyntaxError> {
        parser::parse_expression(source)
    }
}
