//! Tree-walking interpreter for recursion-demo programs.
//!
//! Every call of a user-defined function goes through
//! [`TraceSession::invoke`]; built-ins do not, so they never show up as
//! nodes and never hide the real caller of a traced call.

use crate::domain::ast::*;
use crate::domain::guard::GuardError;
use crate::domain::session::TraceSession;
use crate::domain::value::Value;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

/// Largest list or string (in elements or bytes) an operation may build.
pub const MAX_SEQUENCE_LEN: usize = 1 << 22;

/// Native stack a trace may use when the caller does not say how much the
/// thread has to spare.
pub const DEFAULT_STACK_BUDGET: usize = 1 << 20;

/// Errors raised while running traced code.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error(transparent)]
    Aborted(#[from] GuardError),
    #[error("name '{0}' is not defined")]
    UndefinedName(String),
    #[error("function '{0}' is not defined")]
    UndefinedFunction(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("sequence of length {len} exceeds the limit of {limit}")]
    SequenceTooLong { len: u128, limit: usize },
    #[error("{function}(): {message}")]
    Arity { function: String, message: String },
    #[error("maximum recursion depth of {limit} exceeded")]
    RecursionLimit { limit: usize },
    #[error("maximum recursion depth exceeded: native stack exhausted at depth {depth}")]
    StackExhausted { depth: usize },
    #[error("'{0}' outside loop")]
    LoopControl(&'static str),
    #[error("entry must be a call of a defined function")]
    NotAnEntryCall,
    #[error("entry arguments may not call traced function '{0}'")]
    EntryArgumentCall(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

type Frame = HashMap<String, Value>;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter<'p> {
    program: &'p Program,
    max_depth: usize,
    stack_budget: usize,
    stack_base: Cell<usize>,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program, max_depth: usize) -> Self {
        Self {
            program,
            max_depth,
            stack_budget: DEFAULT_STACK_BUDGET,
            stack_base: Cell::new(0),
        }
    }

    /// Bytes of native stack the run may use below [`run_entry`](Self::run_entry).
    pub fn with_stack_budget(mut self, bytes: usize) -> Self {
        self.stack_budget = bytes;
        self
    }

    /// Evaluate the entry call as the root of the trace.
    pub fn run_entry(&self, session: &mut TraceSession, entry: &Expr) -> Result<Value> {
        self.stack_base.set(stack_position());
        let Expr::Call { func, args, kwargs, .. } = entry else {
            return Err(RuntimeError::NotAnEntryCall);
        };
        let def = self
            .program
            .function(func)
            .ok_or_else(|| RuntimeError::UndefinedFunction(func.clone()))?;
        for arg in args.iter().chain(kwargs.iter().map(|(_, e)| e)) {
            if let Some(name) = self.find_user_call(arg) {
                return Err(RuntimeError::EntryArgumentCall(name.to_string()));
            }
        }

        let mut globals = Frame::new();
        let args = self.eval_args(session, &mut globals, args)?;
        let kwargs = self.eval_kwargs(session, &mut globals, kwargs)?;
        self.call_user(session, def, args, kwargs)
    }

    /// First call of a user-defined function inside `expr`, if any.
    fn find_user_call<'e>(&self, expr: &'e Expr) -> Option<&'e str> {
        match expr {
            Expr::Call { func, args, kwargs, .. } => {
                if self.program.function(func).is_some() {
                    return Some(func.as_str());
                }
                args.iter()
                    .chain(kwargs.iter().map(|(_, e)| e))
                    .find_map(|e| self.find_user_call(e))
            }
            Expr::Literal(_) | Expr::Name(_) => None,
            Expr::List(items) => items.iter().find_map(|e| self.find_user_call(e)),
            Expr::Unary { operand, .. } => self.find_user_call(operand),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.find_user_call(left).or_else(|| self.find_user_call(right))
            }
            Expr::Method { receiver, args, .. } => self
                .find_user_call(receiver)
                .or_else(|| args.iter().find_map(|e| self.find_user_call(e))),
            Expr::Index { base, index } => {
                self.find_user_call(base).or_else(|| self.find_user_call(index))
            }
            Expr::Slice { base, start, end } => self
                .find_user_call(base)
                .or_else(|| start.as_deref().and_then(|e| self.find_user_call(e)))
                .or_else(|| end.as_deref().and_then(|e| self.find_user_call(e))),
        }
    }

    fn call_user(
        &self,
        session: &mut TraceSession,
        def: &FunctionDef,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        if session.depth() >= self.max_depth {
            return Err(RuntimeError::RecursionLimit { limit: self.max_depth });
        }
        let mut frame = self.bind_params(session, def, &args, &kwargs)?;
        session.invoke(&def.name, &args, &kwargs, |s| {
            match self.exec_block(s, &mut frame, &def.body)? {
                Flow::Return(v) => Ok(v),
                Flow::Normal => Ok(Value::None),
                Flow::Break => Err(RuntimeError::LoopControl("break")),
                Flow::Continue => Err(RuntimeError::LoopControl("continue")),
            }
        })
    }

    fn bind_params(
        &self,
        session: &mut TraceSession,
        def: &FunctionDef,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Frame> {
        let arity = |message: String| RuntimeError::Arity {
            function: def.name.clone(),
            message,
        };
        if args.len() > def.params.len() {
            return Err(arity(format!(
                "takes {} positional arguments but {} were given",
                def.params.len(),
                args.len()
            )));
        }

        let mut frame = Frame::new();
        for (param, value) in def.params.iter().zip(args) {
            frame.insert(param.name.clone(), value.clone());
        }
        for (key, value) in kwargs {
            let Some(idx) = def.params.iter().position(|p| p.name == *key) else {
                return Err(arity(format!("unexpected keyword argument '{}'", key)));
            };
            if idx < args.len() {
                return Err(arity(format!("got multiple values for argument '{}'", key)));
            }
            frame.insert(key.clone(), value.clone());
        }
        for param in &def.params {
            if frame.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(expr) => {
                    let value = self.eval(session, &mut Frame::new(), expr)?;
                    frame.insert(param.name.clone(), value);
                }
                None => {
                    return Err(arity(format!("missing required argument '{}'", param.name)));
                }
            }
        }
        Ok(frame)
    }

    // ── Statements ──

    fn exec_block(&self, s: &mut TraceSession, frame: &mut Frame, body: &[Stmt]) -> Result<Flow> {
        for stmt in body {
            match self.exec(s, frame, stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&self, s: &mut TraceSession, frame: &mut Frame, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(s, frame, expr)?;
            }
            Stmt::Assign { target, value } => {
                let value = self.eval(s, frame, value)?;
                self.assign(s, frame, target, value)?;
            }
            Stmt::AugAssign { target, op, value } => {
                let current = match target {
                    Target::Name(name) => self.lookup(frame, name)?,
                    Target::Index { base, index } => {
                        let base = self.eval(s, frame, base)?;
                        let index = self.eval(s, frame, index)?;
                        index_value(&base, &index)?
                    }
                };
                let rhs = self.eval(s, frame, value)?;
                let updated = binary(*op, &current, &rhs)?;
                self.assign(s, frame, target, updated)?;
            }
            Stmt::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(s, frame, cond)?.truthy() {
                        return self.exec_block(s, frame, body);
                    }
                }
                return self.exec_block(s, frame, orelse);
            }
            Stmt::While { cond, body } => {
                while self.eval(s, frame, cond)?.truthy() {
                    s.check_limits()?;
                    match self.exec_block(s, frame, body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            Stmt::For { var, iter, body } => {
                let iterable = self.eval(s, frame, iter)?;
                for item in iter_items(&iterable)? {
                    s.check_limits()?;
                    frame.insert(var.clone(), item);
                    match self.exec_block(s, frame, body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval(s, frame, e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Pass => {}
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn assign(&self, s: &mut TraceSession, frame: &mut Frame, target: &Target, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => {
                frame.insert(name.clone(), value);
                Ok(())
            }
            Target::Index { base, index } => {
                let base = self.eval(s, frame, base)?;
                let index = self.eval(s, frame, index)?;
                let Value::List(items) = &base else {
                    return Err(RuntimeError::Type(format!(
                        "'{}' object does not support item assignment",
                        base.type_name()
                    )));
                };
                let mut items = items.borrow_mut();
                let idx = normalize_index(&index, items.len())?;
                items[idx] = value;
                Ok(())
            }
        }
    }

    // ── Expressions ──

    fn lookup(&self, frame: &Frame, name: &str) -> Result<Value> {
        frame
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedName(name.to_string()))
    }

    fn eval_args(&self, s: &mut TraceSession, frame: &mut Frame, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|a| self.eval(s, frame, a)).collect()
    }

    fn eval_kwargs(
        &self,
        s: &mut TraceSession,
        frame: &mut Frame,
        kwargs: &[(String, Expr)],
    ) -> Result<Vec<(String, Value)>> {
        kwargs
            .iter()
            .map(|(k, e)| Ok((k.clone(), self.eval(s, frame, e)?)))
            .collect()
    }

    fn check_stack(&self, s: &TraceSession) -> Result<()> {
        let used = stack_position().abs_diff(self.stack_base.get());
        if used > self.stack_budget {
            return Err(RuntimeError::StackExhausted { depth: s.depth() });
        }
        Ok(())
    }

    fn eval(&self, s: &mut TraceSession, frame: &mut Frame, expr: &Expr) -> Result<Value> {
        self.check_stack(s)?;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::List(items) => Ok(Value::list(self.eval_args(s, frame, items)?)),
            Expr::Name(name) => self.lookup(frame, name),
            Expr::Unary { op, operand } => {
                let v = self.eval(s, frame, operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                    UnaryOp::Neg => match v {
                        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(RuntimeError::Overflow),
                        Value::Bool(b) => Ok(Value::Int(-i64::from(b))),
                        Value::Float(x) => Ok(Value::Float(-x)),
                        other => Err(RuntimeError::Type(format!(
                            "bad operand type for unary -: '{}'",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(s, frame, left)?;
                let r = self.eval(s, frame, right)?;
                binary(*op, &l, &r)
            }
            Expr::Logical { and, left, right } => {
                let l = self.eval(s, frame, left)?;
                if l.truthy() == *and {
                    self.eval(s, frame, right)
                } else {
                    Ok(l)
                }
            }
            Expr::Call { func, args, kwargs, .. } => {
                let args = self.eval_args(s, frame, args)?;
                let kwargs = self.eval_kwargs(s, frame, kwargs)?;
                match self.program.function(func) {
                    Some(def) => self.call_user(s, def, args, kwargs),
                    None => call_builtin(s, func, args, kwargs),
                }
            }
            Expr::Method { receiver, name, args, .. } => {
                let receiver = self.eval(s, frame, receiver)?;
                let args = self.eval_args(s, frame, args)?;
                call_method(&receiver, name, args)
            }
            Expr::Index { base, index } => {
                let base = self.eval(s, frame, base)?;
                let index = self.eval(s, frame, index)?;
                index_value(&base, &index)
            }
            Expr::Slice { base, start, end } => {
                let base = self.eval(s, frame, base)?;
                let start = match start {
                    Some(e) => Some(self.eval(s, frame, e)?),
                    None => None,
                };
                let end = match end {
                    Some(e) => Some(self.eval(s, frame, e)?),
                    None => None,
                };
                slice_value(&base, start.as_ref(), end.as_ref())
            }
        }
    }
}

/// Address of a local in a fresh frame; differences between two calls
/// measure how much native stack lies between them.
#[inline(never)]
fn stack_position() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

// ── Built-ins ──

fn call_builtin(
    s: &mut TraceSession,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    let arity = |message: &str| RuntimeError::Arity {
        function: name.to_string(),
        message: message.to_string(),
    };
    if !kwargs.is_empty() {
        return Err(arity("takes no keyword arguments"));
    }
    match (name, args.as_slice()) {
        ("len", [v]) => match v {
            Value::List(items) => Ok(Value::from(items.borrow().len())),
            Value::Str(st) => Ok(Value::from(st.chars().count())),
            other => Err(RuntimeError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        },
        ("len", _) => Err(arity("takes exactly one argument")),
        ("range", bounds) => {
            let nums = bounds.iter().map(expect_int).collect::<Result<Vec<_>>>()?;
            let (start, stop, step) = match nums.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(arity("takes one to three arguments")),
            };
            if step == 0 {
                return Err(RuntimeError::Type("range() arg 3 must not be zero".to_string()));
            }
            let span = if step > 0 {
                i128::from(stop) - i128::from(start)
            } else {
                i128::from(start) - i128::from(stop)
            };
            let count = if span > 0 { (span - 1) / i128::from(step).abs() + 1 } else { 0 };
            let mut items = Vec::with_capacity(sequence_len(count as u128)?);
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                items.push(Value::Int(i));
                i = i.checked_add(step).ok_or(RuntimeError::Overflow)?;
            }
            Ok(Value::list(items))
        }
        ("abs", [v]) => match v {
            Value::Int(i) => i.checked_abs().map(Value::Int).ok_or(RuntimeError::Overflow),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            other => Err(RuntimeError::Type(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
        ("abs", _) => Err(arity("takes exactly one argument")),
        ("min" | "max", items) if !items.is_empty() => {
            let pool: Vec<Value> = match items {
                [Value::List(list)] => list.borrow().clone(),
                _ => items.to_vec(),
            };
            let want = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best: Option<Value> = None;
            for item in pool {
                best = match best {
                    Some(b) if compare(&item, &b)? != want => Some(b),
                    _ => Some(item),
                };
            }
            best.ok_or_else(|| arity("arg is an empty sequence"))
        }
        ("min" | "max", _) => Err(arity("expected at least one argument")),
        ("str", [v]) => Ok(Value::Str(v.to_string())),
        ("int", [v]) => match v {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Float(x) => Ok(Value::Int(x.trunc() as i64)),
            Value::Str(st) => st
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| RuntimeError::Type(format!("invalid literal for int(): '{}'", st))),
            other => Err(RuntimeError::Type(format!(
                "int() argument must not be '{}'",
                other.type_name()
            ))),
        },
        ("str" | "int", _) => Err(arity("takes exactly one argument")),
        ("track", [Value::Str(key), value]) => {
            s.annotate(key, value);
            Ok(Value::None)
        }
        ("track", _) => Err(arity("takes a string key and a value")),
        _ => Err(RuntimeError::UndefinedFunction(name.to_string())),
    }
}

fn call_method(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value> {
    let Value::List(items) = receiver else {
        return Err(RuntimeError::Type(format!(
            "'{}' object has no method '{}'",
            receiver.type_name(),
            name
        )));
    };
    match (name, args.as_slice()) {
        ("append", [v]) => {
            let mut items = items.borrow_mut();
            sequence_len(items.len() as u128 + 1)?;
            items.push(v.clone());
            Ok(Value::None)
        }
        ("pop", []) => items
            .borrow_mut()
            .pop()
            .ok_or(RuntimeError::IndexOutOfRange { index: -1, len: 0 }),
        ("pop", [idx]) => {
            let mut items = items.borrow_mut();
            let i = normalize_index(idx, items.len())?;
            Ok(items.remove(i))
        }
        _ => Err(RuntimeError::Type(format!(
            "unsupported list method call '{}' with {} arguments",
            name,
            args.len()
        ))),
    }
}

// ── Operators ──

enum Num {
    I(i64),
    F(f64),
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Int(i) => Some(Num::I(*i)),
        Value::Bool(b) => Some(Num::I(i64::from(*b))),
        Value::Float(x) => Some(Num::F(*x)),
        _ => None,
    }
}

fn as_f64(n: &Num) -> f64 {
    match n {
        Num::I(i) => *i as f64,
        Num::F(x) => *x,
    }
}

fn expect_int(v: &Value) -> Result<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(RuntimeError::Type(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

fn sequence_len(len: u128) -> Result<usize> {
    match usize::try_from(len) {
        Ok(n) if n <= MAX_SEQUENCE_LEN => Ok(n),
        _ => Err(RuntimeError::SequenceTooLong { len, limit: MAX_SEQUENCE_LEN }),
    }
}

/// Number of repetitions for `seq * times`, once the result is known to fit.
fn repeat_count(len: usize, times: i64) -> Result<usize> {
    let times = times.max(0) as u128;
    sequence_len((len as u128).checked_mul(times).ok_or(RuntimeError::Overflow)?)?;
    Ok(if len == 0 { 0 } else { times as usize })
}

fn unsupported(op: BinOp, l: &Value, r: &Value) -> RuntimeError {
    RuntimeError::Type(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op.symbol(),
        l.type_name(),
        r.type_name()
    ))
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(l == r)),
        BinOp::NotEq => return Ok(Value::Bool(l != r)),
        BinOp::Lt => return Ok(Value::Bool(compare(l, r)? == Ordering::Less)),
        BinOp::LtEq => return Ok(Value::Bool(compare(l, r)? != Ordering::Greater)),
        BinOp::Gt => return Ok(Value::Bool(compare(l, r)? == Ordering::Greater)),
        BinOp::GtEq => return Ok(Value::Bool(compare(l, r)? != Ordering::Less)),
        BinOp::In => return contains(r, l).map(Value::Bool),
        _ => {}
    }

    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            sequence_len(a.len() as u128 + b.len() as u128)?;
            return Ok(Value::Str(format!("{}{}", a, b)));
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let (xs, ys) = (a.borrow().clone(), b.borrow().clone());
            let mut items = Vec::with_capacity(sequence_len(xs.len() as u128 + ys.len() as u128)?);
            items.extend(xs);
            items.extend(ys);
            return Ok(Value::list(items));
        }
        (BinOp::Mul, Value::List(a), n) | (BinOp::Mul, n, Value::List(a)) if num(n).is_some() => {
            let base = a.borrow().clone();
            let times = repeat_count(base.len(), expect_int(n)?)?;
            let items = (0..times).flat_map(|_| base.iter().cloned()).collect();
            return Ok(Value::list(items));
        }
        (BinOp::Mul, Value::Str(a), n) | (BinOp::Mul, n, Value::Str(a)) if num(n).is_some() => {
            let times = repeat_count(a.len(), expect_int(n)?)?;
            return Ok(Value::Str(a.repeat(times)));
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (num(l), num(r)) else {
        return Err(unsupported(op, l, r));
    };
    match (a, b) {
        (Num::I(a), Num::I(b)) => int_op(op, a, b),
        (a, b) => float_op(op, as_f64(&a), as_f64(&b)),
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value> {
    let checked = |v: Option<i64>| v.map(Value::Int).ok_or(RuntimeError::Overflow);
    match op {
        BinOp::Add => checked(a.checked_add(b)),
        BinOp::Sub => checked(a.checked_sub(b)),
        BinOp::Mul => checked(a.checked_mul(b)),
        BinOp::Div => float_op(op, a as f64, b as f64),
        BinOp::FloorDiv | BinOp::Mod if b == 0 => Err(RuntimeError::DivisionByZero),
        BinOp::FloorDiv => {
            let q = a.checked_div(b).ok_or(RuntimeError::Overflow)?;
            // Round toward negative infinity.
            if a % b != 0 && ((a < 0) != (b < 0)) {
                Ok(Value::Int(q - 1))
            } else {
                Ok(Value::Int(q))
            }
        }
        BinOp::Mod => {
            let r = a.checked_rem(b).ok_or(RuntimeError::Overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                Ok(Value::Int(r + b))
            } else {
                Ok(Value::Int(r))
            }
        }
        BinOp::Pow if b >= 0 => {
            let exp = u32::try_from(b).map_err(|_| RuntimeError::Overflow)?;
            checked(a.checked_pow(exp))
        }
        BinOp::Pow => float_op(op, a as f64, b as f64),
        _ => Err(unsupported(op, &Value::Int(a), &Value::Int(b))),
    }
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err(RuntimeError::DivisionByZero)
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => a.powf(b),
        _ => return Err(unsupported(op, &Value::Float(a), &Value::Float(b))),
    };
    Ok(Value::Float(v))
}

fn compare(l: &Value, r: &Value) -> Result<Ordering> {
    compare_with(l, r, &mut Vec::new())
}

type ListPair = (*const RefCell<Vec<Value>>, *const RefCell<Vec<Value>>);

// A pair of lists met again while still being compared orders as equal.
fn compare_with(l: &Value, r: &Value, path: &mut Vec<ListPair>) -> Result<Ordering> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
            if Rc::ptr_eq(a, b) || path.contains(&pair) {
                return Ok(Ordering::Equal);
            }
            let (a, b) = (a.borrow(), b.borrow());
            path.push(pair);
            for (x, y) in a.iter().zip(b.iter()) {
                match compare_with(x, y, path)? {
                    Ordering::Equal => {}
                    other => {
                        path.pop();
                        return Ok(other);
                    }
                }
            }
            path.pop();
            Ok(a.len().cmp(&b.len()))
        }
        _ => match (num(l), num(r)) {
            (Some(Num::I(a)), Some(Num::I(b))) => Ok(a.cmp(&b)),
            (Some(a), Some(b)) => as_f64(&a)
                .partial_cmp(&as_f64(&b))
                .ok_or_else(|| RuntimeError::Type("cannot order NaN".to_string())),
            _ => Err(RuntimeError::Type(format!(
                "'<' not supported between '{}' and '{}'",
                l.type_name(),
                r.type_name()
            ))),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    match (container, item) {
        (Value::List(items), _) => Ok(items.borrow().iter().any(|v| v == item)),
        (Value::Str(hay), Value::Str(needle)) => Ok(hay.contains(needle.as_str())),
        _ => Err(RuntimeError::Type(format!(
            "argument of type '{}' is not iterable",
            container.type_name()
        ))),
    }
}

fn iter_items(v: &Value) -> Result<Vec<Value>> {
    match v {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Str(st) => Ok(st.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(RuntimeError::Type(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize) -> Result<usize> {
    let i = expect_int(index)?;
    let adjusted = if i < 0 { i + len as i64 } else { i };
    if adjusted < 0 || adjusted >= len as i64 {
        return Err(RuntimeError::IndexOutOfRange { index: i, len });
    }
    Ok(adjusted as usize)
}

fn index_value(base: &Value, index: &Value) -> Result<Value> {
    match base {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(st) => {
            let chars: Vec<char> = st.chars().collect();
            let i = normalize_index(index, chars.len())?;
            Ok(Value::Str(chars[i].to_string()))
        }
        other => Err(RuntimeError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Clamp slice bounds the forgiving way: out-of-range bounds are cut to fit.
fn slice_bounds(start: Option<&Value>, end: Option<&Value>, len: usize) -> Result<(usize, usize)> {
    let clamp = |v: Option<&Value>, default: usize| -> Result<usize> {
        match v {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let i = expect_int(v)?;
                let i = if i < 0 { i + len as i64 } else { i };
                Ok(i.clamp(0, len as i64) as usize)
            }
        }
    };
    let lo = clamp(start, 0)?;
    let hi = clamp(end, len)?;
    Ok((lo, hi.max(lo)))
}

fn slice_value(base: &Value, start: Option<&Value>, end: Option<&Value>) -> Result<Value> {
    match base {
        Value::List(items) => {
            let items = items.borrow();
            let (lo, hi) = slice_bounds(start, end, items.len())?;
            Ok(Value::list(items[lo..hi].to_vec()))
        }
        Value::Str(st) => {
            let chars: Vec<char> = st.chars().collect();
            let (lo, hi) = slice_bounds(start, end, chars.len())?;
            Ok(Value::Str(chars[lo..hi].iter().collect()))
        }
        other => Err(RuntimeError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::parser::{parse_expression, parse_program};
    use std::time::Duration;

    fn run(src: &str, entry: &str) -> (Result<Value>, TraceSession) {
        let program = parse_program(src).unwrap();
        let entry = parse_expression(entry).unwrap();
        let mut session = TraceSession::new(10_000, Duration::from_secs(10));
        let out = Interpreter::new(&program, 50).run_entry(&mut session, &entry);
        (out, session)
    }

    #[test]
    fn test_arithmetic_follows_floor_semantics() {
        let src = "def f(a, b):\n    return [a // b, a % b, a / b, a ** 2]\n";
        let (out, _) = run(src, "f(-7, 2)");
        assert_eq!(out.unwrap().to_string(), "[-4, 1, -3.5, 49]");
    }

    #[test]
    fn test_keyword_and_default_binding() {
        let src = "def f(a, b=10, c=20):\n    return a + b + c\n";
        let (out, session) = run(src, "f(1, c=3)");
        assert_eq!(out.unwrap(), Value::Int(14));
        let root = session.store().root().unwrap();
        assert_eq!(root.call_string(), "f(1, c: 3)");
    }

    #[test]
    fn test_loops_and_builtins() {
        let src = "
def total(xs):
    acc = 0
    for x in xs:
        if x == 3:
            continue
        acc += x
    i = 0
    while True:
        i += 1
        if i > 2:
            break
    return acc + len(xs) + max(xs) + min(4, i)
";
        let (out, session) = run(src, "total(range(5))");
        // 0+1+2+4 = 7, len 5, max 4, min(4, 3) = 3
        assert_eq!(out.unwrap(), Value::Int(19));
        assert_eq!(session.store().len(), 1);
    }

    #[test]
    fn test_mutation_is_visible_to_caller() {
        let src = "
def push(xs, v):
    xs.append(v)

def outer():
    xs = [1]
    push(xs, 2)
    push(xs, 3)
    return xs
";
        let (out, session) = run(src, "outer()");
        assert_eq!(out.unwrap().to_string(), "[1, 2, 3]");
        let calls: Vec<String> = session.store().iter().map(|r| r.call_string()).collect();
        assert_eq!(calls, vec!["outer()", "push([1], 2)", "push([1, 2], 3)"]);
    }

    #[test]
    fn test_track_annotates_current_call() {
        let src = "def f(n):\n    track('half', n // 2)\n    return n\n";
        let (_, session) = run(src, "f(9)");
        let root = session.store().root().unwrap();
        assert_eq!(root.annotations, vec![("half".to_string(), Value::Int(4))]);
    }

    #[test]
    fn test_recursion_limit() {
        let src = "def down(n):\n    return down(n + 1)\n";
        let (out, session) = run(src, "down(0)");
        assert_eq!(out, Err(RuntimeError::RecursionLimit { limit: 50 }));
        assert_eq!(session.store().len(), 50);
    }

    #[test]
    fn test_stack_budget_stops_deep_recursion() {
        let program = parse_program("def down(n):\n    return down(n + 1)\n").unwrap();
        let entry = parse_expression("down(0)").unwrap();
        let mut session = TraceSession::new(usize::MAX, Duration::from_secs(60));
        let out = Interpreter::new(&program, usize::MAX)
            .with_stack_budget(64 * 1024)
            .run_entry(&mut session, &entry);

        let depth = match out {
            Err(RuntimeError::StackExhausted { depth }) => depth,
            other => panic!("expected stack exhaustion, got {:?}", other),
        };
        assert!(depth > 0);
        assert_eq!(session.depth(), 0);
        assert!(session.store().iter().all(|r| !r.is_complete()));
    }

    #[test]
    fn test_oversized_sequences_are_rejected() {
        let (out, _) = run("def f(s):\n    return s * 9000000000000000000\n", "f('abc')");
        assert!(matches!(out, Err(RuntimeError::SequenceTooLong { .. })));

        let (out, _) = run("def f(xs):\n    return xs * 9000000000000000000\n", "f([1, 2])");
        assert!(matches!(out, Err(RuntimeError::SequenceTooLong { .. })));

        let (out, _) = run("def f(n):\n    return len(range(n))\n", "f(9000000000000000000)");
        assert!(matches!(out, Err(RuntimeError::SequenceTooLong { .. })));

        // Empty sequences repeat to nothing however large the count.
        let (out, _) = run("def f(xs):\n    return [xs * 9000000000000000000, '' * 5]\n", "f([])");
        assert_eq!(out.unwrap().to_string(), "[[], '']");

        let (out, _) = run("def f(s):\n    return len(s * 3) + len(range(10, 0, -3))\n", "f('ab')");
        assert_eq!(out.unwrap(), Value::Int(10));
    }

    #[test]
    fn test_cyclic_lists_compare_and_print() {
        let src = "
def f():
    xs = [1]
    xs.append(xs)
    ys = [1]
    ys.append(ys)
    return [xs == ys, xs <= ys, xs in [xs], str(xs)]
";
        let (out, _) = run(src, "f()");
        assert_eq!(out.unwrap().to_string(), "[True, True, True, '[1, [...]]']");
    }

    #[test]
    fn test_loops_check_the_clock() {
        let program = parse_program("def spin():\n    while True:\n        pass\n").unwrap();
        let entry = parse_expression("spin()").unwrap();
        let mut session = TraceSession::new(10, Duration::from_millis(20));
        session.reset();
        let out = Interpreter::new(&program, 10).run_entry(&mut session, &entry);
        assert!(matches!(
            out,
            Err(RuntimeError::Aborted(GuardError::TooMuchTime { .. }))
        ));
        assert_eq!(session.store().len(), 1);
    }

    #[test]
    fn test_runtime_errors_propagate() {
        let (out, _) = run("def f(xs):\n    return xs[5]\n", "f([1])");
        assert_eq!(out, Err(RuntimeError::IndexOutOfRange { index: 5, len: 1 }));

        let (out, _) = run("def f(n):\n    return n // 0\n", "f(1)");
        assert_eq!(out, Err(RuntimeError::DivisionByZero));

        let (out, _) = run("def f(n):\n    return m\n", "f(1)");
        assert_eq!(out, Err(RuntimeError::UndefinedName("m".to_string())));
    }

    #[test]
    fn test_entry_must_be_single_traced_call() {
        let (out, _) = run("def f(n):\n    return n\n", "f(1) + 1");
        assert_eq!(out, Err(RuntimeError::NotAnEntryCall));

        let (out, session) = run("def f(n):\n    return n\n", "f(f(1))");
        assert_eq!(out, Err(RuntimeError::EntryArgumentCall("f".to_string())));
        assert!(session.store().is_empty());
    }

    #[test]
    fn test_arity_errors() {
        let (out, _) = run("def f(a):\n    return a\n", "f(1, 2)");
        assert!(matches!(out, Err(RuntimeError::Arity { .. })));
        let (out, _) = run("def f(a):\n    return a\n", "f(b=2)");
        assert!(matches!(out, Err(RuntimeError::Arity { .. })));
    }

    #[test]
    fn test_slices() {
        let src = "def f(xs):\n    return [xs[1:], xs[:-1], xs[10:], 'abc'[1:]]\n";
        let (out, _) = run(src, "f([1, 2, 3])");
        assert_eq!(out.unwrap().to_string(), "[[2, 3], [1, 2], [], 'bc']");
    }
}
