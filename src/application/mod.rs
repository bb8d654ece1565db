// Use cases for recurviz: record a trace and render it.

use std::io;
use std::panic;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::guard::GuardError;
use crate::domain::session::TraceSession;
use crate::domain::store::GraphStore;
use crate::domain::value::Value;
use crate::infrastructure::config::TraceConfig;
use crate::infrastructure::interpreter::{Interpreter, RuntimeError, DEFAULT_STACK_BUDGET};
use crate::infrastructure::lexer::SyntaxError;
use crate::infrastructure::IndentParser;
use crate::ports::dot_exporter::DotExporter;
use crate::ports::{DiagramExporter, ProgramParser};

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace aborted: more than {limit} invocations")]
    TooManyInvocations { limit: usize },

    #[error("trace aborted: ran longer than {limit:?}")]
    TooMuchTime { limit: Duration },

    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("runtime error: {0}")]
    Runtime(RuntimeError),

    #[error("cannot start trace thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Native stack reserved per level of `max_depth` on the trace thread.
const STACK_PER_LEVEL: usize = 64 * 1024;
const MIN_STACK: usize = 8 * 1024 * 1024;
const MAX_STACK: usize = 512 * 1024 * 1024;
/// Part of the trace thread's stack kept out of the interpreter's budget.
const STACK_HEADROOM: usize = 1024 * 1024;

/// Stack size for the thread that runs a trace with the given depth limit.
pub fn worker_stack_size(max_depth: usize) -> usize {
    max_depth
        .saturating_mul(STACK_PER_LEVEL)
        .saturating_add(STACK_HEADROOM)
        .clamp(MIN_STACK, MAX_STACK)
}

impl From<GuardError> for TraceError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::TooManyInvocations { limit } => TraceError::TooManyInvocations { limit },
            GuardError::TooMuchTime { limit } => TraceError::TooMuchTime { limit },
        }
    }
}

impl From<RuntimeError> for TraceError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Aborted(guard) => guard.into(),
            other => TraceError::Runtime(other),
        }
    }
}

pub struct TraceUsecase<'a> {
    pub parser: &'a dyn ProgramParser,
    pub exporter: &'a dyn DiagramExporter,
    pub config: TraceConfig,
}

impl<'a> TraceUsecase<'a> {
    /// Run `entry` against `definition` and hand back everything recorded,
    /// whether or not the run finished.
    ///
    /// Runs on the calling thread with a conservative stack budget, so very
    /// deep recursion fails early here. [`run`](Self::run) uses a dedicated
    /// thread sized for `max_depth`.
    pub fn record(&self, definition: &str, entry: &str) -> (GraphStore, Result<Value, TraceError>) {
        self.record_with_budget(definition, entry, DEFAULT_STACK_BUDGET)
    }

    fn record_with_budget(
        &self,
        definition: &str,
        entry: &str,
        stack_budget: usize,
    ) -> (GraphStore, Result<Value, TraceError>) {
        let program = match self.parser.parse_program(definition) {
            Ok(program) => program,
            Err(err) => return (GraphStore::new(), Err(err.into())),
        };
        let entry_expr = match self.parser.parse_entry(entry) {
            Ok(expr) => expr,
            Err(err) => return (GraphStore::new(), Err(err.into())),
        };

        let mut session = TraceSession::new(self.config.max_invocations, self.config.max_duration);
        session.reset();
        info!(
            entry,
            functions = program.functions.len(),
            max_invocations = self.config.max_invocations,
            "trace start"
        );

        let interpreter = Interpreter::new(&program, self.config.max_depth).with_stack_budget(stack_budget);
        let outcome = interpreter.run_entry(&mut session, &entry_expr).map_err(TraceError::from);
        let store = session.into_store();

        match &outcome {
            Ok(value) => info!(invocations = store.len(), result = %value, "trace finished"),
            Err(err) => warn!(invocations = store.len(), error = %err, "trace failed"),
        }
        (store, outcome)
    }

    /// Record and render. Any failure replaces the diagram.
    pub fn run(&self, definition: &str, entry: &str) -> Result<String, TraceError> {
        let stack = worker_stack_size(self.config.max_depth);
        thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("recurviz-trace".to_string())
                .stack_size(stack)
                .spawn_scoped(scope, || -> Result<String, TraceError> {
                    let (store, outcome) = self.record_with_budget(definition, entry, stack - STACK_HEADROOM);
                    outcome?;
                    Ok(self.exporter.export(&store))
                })
                .map_err(TraceError::Spawn)?;
            worker.join().unwrap_or_else(|payload| panic::resume_unwind(payload))
        })
    }
}

/// Trace `entry_call` against `definition_source` with default limits and
/// return the DOT diagram.
pub fn trace(definition_source: &str, entry_call: &str) -> Result<String, TraceError> {
    let exporter = DotExporter::new(false);
    let usecase = TraceUsecase {
        parser: &IndentParser,
        exporter: &exporter,
        config: TraceConfig::default(),
    };
    usecase.run(definition_source, entry_call)
}
