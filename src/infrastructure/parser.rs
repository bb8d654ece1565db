//! Recursive descent parser for recursion-demo source.
//!
//! Precedence, lowest first: `or`, `and`, `not`, comparisons and `in`,
//! `+ -`, `* / // %`, unary `-`, `**` (right associative), then calls,
//! indexing, slicing and method calls.

use crate::domain::ast::*;
use crate::domain::value::Value;
use crate::infrastructure::lexer::{tokenize, SyntaxError, Token, TokenKind};

/// Deepest syntax tree the parser will build. Nested blocks, brackets,
/// prefix operators and each link of an operator chain count one level.
pub const MAX_NESTING: usize = 200;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, depth: 0 }
    }

    /// Go one level deeper. A failed parse is abandoned, so only the
    /// success paths give levels back.
    fn descend(&mut self) -> Result<(), SyntaxError> {
        if self.depth >= MAX_NESTING {
            let tok = self.current();
            return Err(SyntaxError::TooDeeplyNested { line: tok.line, col: tok.col });
        }
        self.depth += 1;
        Ok(())
    }

    fn current(&self) -> &Token {
        // The lexer always ends the stream with Eof.
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_nth(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, expected: &str) -> SyntaxError {
        let tok = self.current();
        SyntaxError::Unexpected {
            found: tok.kind.to_string(),
            expected: expected.to_string(),
            line: tok.line,
            col: tok.col,
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(&kind.to_string()))
        }
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("identifier")),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    // ── Top level ──

    pub fn parse_program(&mut self) -> Result<Program, SyntaxError> {
        let mut program = Program::default();
        self.skip_newlines();
        while !matches!(self.peek_kind(), TokenKind::Eof) {
            if !self.check(&TokenKind::Def) {
                return Err(SyntaxError::TopLevelStatement { line: self.current().line });
            }
            let def = self.parse_def()?;
            if program.function(&def.name).is_some() {
                return Err(SyntaxError::DuplicateFunction { name: def.name, line: def.line });
            }
            program.functions.push(def);
            self.skip_newlines();
        }
        Ok(program)
    }

    fn parse_def(&mut self) -> Result<FunctionDef, SyntaxError> {
        let line = self.expect(&TokenKind::Def)?.line;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let mut params: Vec<Param> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let pname = self.expect_ident()?;
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("default value after defaulted parameter"));
            }
            params.push(Param { name: pname, default });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_suite()?;
        Ok(FunctionDef { name, params, body, line })
    }

    /// `:` followed by either an indented block or one simple statement.
    fn parse_suite(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.descend()?;
        let body = self.parse_block()?;
        self.depth -= 1;
        Ok(body)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(&TokenKind::Colon)?;
        if !self.eat(&TokenKind::Newline) {
            return Ok(vec![self.parse_simple_stmt()?]);
        }
        self.skip_newlines();
        self.expect(&TokenKind::Indent)?;
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Dedent) || self.check(&TokenKind::Eof) {
                break;
            }
            body.push(self.parse_stmt()?);
        }
        Ok(body)
    }

    // ── Statements ──

    fn parse_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        match self.peek_kind() {
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                let cond = self.parse_expr()?;
                let body = self.parse_suite()?;
                Ok(Stmt::While { cond, body })
            }
            TokenKind::For => {
                self.advance();
                let var = self.expect_ident()?;
                self.expect(&TokenKind::In)?;
                let iter = self.parse_expr()?;
                let body = self.parse_suite()?;
                Ok(Stmt::For { var, iter, body })
            }
            TokenKind::Def => Err(self.error("statement (nested functions are not supported)")),
            _ => self.parse_simple_stmt(),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect(&TokenKind::If)?;
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        branches.push((cond, self.parse_suite()?));
        let mut orelse = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Elif) {
                let cond = self.parse_expr()?;
                branches.push((cond, self.parse_suite()?));
            } else if self.eat(&TokenKind::Else) {
                orelse = self.parse_suite()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If { branches, orelse })
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let stmt = match self.peek_kind() {
            TokenKind::Return => {
                self.advance();
                if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.parse_expr()?))
                }
            }
            TokenKind::Pass => {
                self.advance();
                Stmt::Pass
            }
            TokenKind::Break => {
                self.advance();
                Stmt::Break
            }
            TokenKind::Continue => {
                self.advance();
                Stmt::Continue
            }
            _ => self.parse_expr_or_assign()?,
        };
        if !self.eat(&TokenKind::Newline) && !self.check(&TokenKind::Eof) {
            return Err(self.error("end of line"));
        }
        Ok(stmt)
    }

    fn parse_expr_or_assign(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.current().clone();
        let expr = self.parse_expr()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            _ => return Ok(Stmt::Expr(expr)),
        };
        self.advance();
        let target = match expr {
            Expr::Name(name) => Target::Name(name),
            Expr::Index { base, index } => Target::Index { base: *base, index: *index },
            _ => {
                return Err(SyntaxError::Unexpected {
                    found: "expression".to_string(),
                    expected: "assignment target".to_string(),
                    line: start.line,
                    col: start.col,
                })
            }
        };
        let value = self.parse_expr()?;
        Ok(match op {
            None => Stmt::Assign { target, value },
            Some(op) => Stmt::AugAssign { target, op, value },
        })
    }

    // ── Expressions ──

    pub fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.descend()?;
        let expr = self.parse_or()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.eat(&TokenKind::Or) {
            self.descend()?;
            links += 1;
            let right = self.parse_and()?;
            left = Expr::Logical { and: false, left: Box::new(left), right: Box::new(right) };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_not()?;
        let mut links = 0;
        while self.eat(&TokenKind::And) {
            self.descend()?;
            links += 1;
            let right = self.parse_not()?;
            left = Expr::Logical { and: true, left: Box::new(left), right: Box::new(right) };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&TokenKind::Not) {
            self.descend()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_additive()?;
        let mut links = 0;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::NotEq,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::LtEq => BinOp::LtEq,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::GtEq => BinOp::GtEq,
                TokenKind::In => BinOp::In,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_term()?;
        let mut links = 0;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_term()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&TokenKind::Minus) {
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(match operand {
                Expr::Literal(Value::Int(n)) => Expr::Literal(Value::Int(-n)),
                Expr::Literal(Value::Float(x)) => Expr::Literal(Value::Float(-x)),
                other => Expr::Unary { op: UnaryOp::Neg, operand: Box::new(other) },
            });
        }
        if self.eat(&TokenKind::Plus) {
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(operand);
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.parse_postfix()?;
        if self.eat(&TokenKind::StarStar) {
            self.descend()?;
            let exponent = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary { op: BinOp::Pow, left: Box::new(base), right: Box::new(exponent) });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            if matches!(self.peek_kind(), TokenKind::LBracket | TokenKind::Dot) {
                self.descend()?;
                links += 1;
            }
            if self.eat(&TokenKind::LBracket) {
                expr = self.parse_subscript(expr)?;
            } else if self.check(&TokenKind::Dot) {
                let line = self.advance().line;
                let name = self.expect_ident()?;
                self.expect(&TokenKind::LParen)?;
                let (args, kwargs) = self.parse_call_args()?;
                if !kwargs.is_empty() {
                    return Err(self.error("positional arguments for method call"));
                }
                expr = Expr::Method { receiver: Box::new(expr), name, args, line };
            } else {
                break;
            }
        }
        self.depth -= links;
        Ok(expr)
    }

    /// After `[`: either `a[i]` or `a[i:j]` with optional bounds.
    fn parse_subscript(&mut self, base: Expr) -> Result<Expr, SyntaxError> {
        let start = if self.check(&TokenKind::Colon) { None } else { Some(self.parse_expr()?) };
        if self.eat(&TokenKind::Colon) {
            let end = if self.check(&TokenKind::RBracket) { None } else { Some(self.parse_expr()?) };
            self.expect(&TokenKind::RBracket)?;
            return Ok(Expr::Slice {
                base: Box::new(base),
                start: start.map(Box::new),
                end: end.map(Box::new),
            });
        }
        self.expect(&TokenKind::RBracket)?;
        match start {
            Some(index) => Ok(Expr::Index { base: Box::new(base), index: Box::new(index) }),
            None => Err(self.error("index expression")),
        }
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let is_keyword = matches!(self.peek_kind(), TokenKind::Ident(_))
                && matches!(self.peek_nth(1), Some(TokenKind::Assign));
            if is_keyword {
                let name = self.expect_ident()?;
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error("distinct keyword argument"));
                }
                kwargs.push((name, self.parse_expr()?));
            } else if !kwargs.is_empty() {
                return Err(self.error("keyword argument"));
            } else {
                args.push(self.parse_expr()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let tok = self.current().clone();
        match tok.kind {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Int(n)))
            }
            TokenKind::Float(x) => {
                self.advance();
                Ok(Expr::Literal(Value::Float(x)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Str(s)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::NoneLit => {
                self.advance();
                Ok(Expr::Literal(Value::None))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let (args, kwargs) = self.parse_call_args()?;
                    Ok(Expr::Call { func: name, args, kwargs, line: tok.line })
                } else {
                    Ok(Expr::Name(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            _ => Err(self.error("expression")),
        }
    }
}

/// Parse a definition source into a [`Program`].
pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    Parser::new(tokenize(source)?).parse_program()
}

/// Parse a single expression such as the entry call `fib(5)`.
pub fn parse_expression(source: &str) -> Result<Expr, SyntaxError> {
    let mut parser = Parser::new(tokenize(source)?);
    let expr = parser.parse_expr()?;
    parser.skip_newlines();
    parser.expect(&TokenKind::Eof)?;
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIB: &str = "
def fib(n):
  if n == 0:
    return 0
  if n == 1:
    return 1
  else:
    return fib(n - 1) + fib(n - 2)";

    #[test]
    fn test_parse_fib() {
        let program = parse_program(FIB).unwrap();
        assert_eq!(program.functions.len(), 1);
        let fib = program.function("fib").unwrap();
        assert_eq!(fib.params.len(), 1);
        assert_eq!(fib.body.len(), 2);
        match &fib.body[1] {
            Stmt::If { branches, orelse } => {
                assert_eq!(branches.len(), 1);
                assert!(matches!(orelse[0], Stmt::Return(Some(Expr::Binary { op: BinOp::Add, .. }))));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_entry_with_keywords() {
        let expr = parse_expression("walk([1, 2], 0, depth=3)").unwrap();
        match expr {
            Expr::Call { func, args, kwargs, .. } => {
                assert_eq!(func, "walk");
                assert_eq!(args.len(), 2);
                assert_eq!(kwargs.len(), 1);
                assert_eq!(kwargs[0].0, "depth");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let expr = parse_expression("-x ** 2").unwrap();
        assert!(matches!(expr, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_slices_and_methods() {
        let src = "def f(a):\n    b = a[1:]\n    b.append(a[:2])\n    a[0] += 1\n    return b\n";
        let program = parse_program(src).unwrap();
        let body = &program.functions[0].body;
        assert!(matches!(&body[0], Stmt::Assign { value: Expr::Slice { start: Some(_), end: None, .. }, .. }));
        assert!(matches!(&body[1], Stmt::Expr(Expr::Method { .. })));
        assert!(matches!(&body[2], Stmt::AugAssign { target: Target::Index { .. }, op: BinOp::Add, .. }));
    }

    #[test]
    fn test_one_line_suite() {
        let program = parse_program("def f(n):\n    if n < 2: return n\n    return f(n - 1)\n").unwrap();
        assert_eq!(program.functions[0].body.len(), 2);
    }

    #[test]
    fn test_top_level_statement_rejected() {
        let err = parse_program("x = 1\n").unwrap_err();
        assert_eq!(err, SyntaxError::TopLevelStatement { line: 1 });
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let err = parse_program("def f():\n  pass\ndef f():\n  pass\n").unwrap_err();
        assert!(matches!(err, SyntaxError::DuplicateFunction { .. }));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("f({}1{})", "(".repeat(500), ")".repeat(500));
        assert!(matches!(parse_expression(&deep), Err(SyntaxError::TooDeeplyNested { .. })));

        let lists = format!("f({}{})", "[".repeat(5000), "]".repeat(5000));
        assert!(matches!(parse_expression(&lists), Err(SyntaxError::TooDeeplyNested { .. })));

        let chain = vec!["1"; 5000].join(" + ");
        assert!(matches!(parse_expression(&chain), Err(SyntaxError::TooDeeplyNested { .. })));

        let negations = format!("{}1", "- ".repeat(1000));
        assert!(matches!(parse_expression(&negations), Err(SyntaxError::TooDeeplyNested { .. })));

        // Ordinary depth is untouched.
        let shallow = format!("f({}1{})", "(".repeat(40), ")".repeat(40));
        assert!(parse_expression(&shallow).is_ok());
        assert!(parse_expression(&vec!["x"; 100].join(" + ")).is_ok());
    }

    #[test]
    fn test_nesting_limit_covers_blocks() {
        let mut src = String::from("def f(n):\n");
        for level in 1..=300 {
            src.push_str(&" ".repeat(level));
            src.push_str("if n:\n");
        }
        src.push_str(&" ".repeat(301));
        src.push_str("return n\n");
        assert!(matches!(parse_program(&src), Err(SyntaxError::TooDeeplyNested { .. })));
    }

    #[test]
    fn test_trailing_garbage_in_entry() {
        assert!(parse_expression("fib(2) fib(3)").is_err());
    }
}
