//! Indentation-aware lexer for recursion-demo source.

use std::fmt;
use thiserror::Error;

/// Lexing and parsing failures, reported with 1-based positions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyntaxError {
    #[error("unexpected character '{ch}' at line {line}, col {col}")]
    UnexpectedChar { ch: char, line: usize, col: usize },
    #[error("unterminated string at line {line}, col {col}")]
    UnterminatedString { line: usize, col: usize },
    #[error("inconsistent indentation at line {line}")]
    InconsistentIndent { line: usize },
    #[error("invalid number at line {line}, col {col}")]
    InvalidNumber { line: usize, col: usize },
    #[error("unexpected {found} at line {line}, col {col}; expected {expected}")]
    Unexpected { found: String, expected: String, line: usize, col: usize },
    #[error("only function definitions are allowed at top level (line {line})")]
    TopLevelStatement { line: usize },
    #[error("function '{name}' is defined twice (line {line})")]
    DuplicateFunction { name: String, line: usize },    #[error("nesting too deep at line {line}, col {col}")]
    TooDeeplyNested { line: usize, col: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    And,
    Or,
    Not,
    True,
    False,
    NoneLit,
    Pass,
    Break,
    Continue,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Int(n) => return write!(f, "integer {}", n),
            TokenKind::Float(x) => return write!(f, "number {}", x),
            TokenKind::Str(s) => return write!(f, "string \"{}\"", s),
            TokenKind::Ident(name) => return write!(f, "identifier '{}'", name),
            TokenKind::Def => "'def'",
            TokenKind::Return => "'return'",
            TokenKind::If => "'if'",
            TokenKind::Elif => "'elif'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::For => "'for'",
            TokenKind::In => "'in'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::True => "'True'",
            TokenKind::False => "'False'",
            TokenKind::NoneLit => "'None'",
            TokenKind::Pass => "'pass'",
            TokenKind::Break => "'break'",
            TokenKind::Continue => "'continue'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Dot => "'.'",
            TokenKind::Assign => "'='",
            TokenKind::PlusAssign => "'+='",
            TokenKind::MinusAssign => "'-='",
            TokenKind::StarAssign => "'*='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::StarStar => "'**'",
            TokenKind::Slash => "'/'",
            TokenKind::SlashSlash => "'//'",
            TokenKind::Percent => "'%'",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::LtEq => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::GtEq => "'>='",
            TokenKind::Newline => "end of line",
            TokenKind::Indent => "indent",
            TokenKind::Dedent => "dedent",
            TokenKind::Eof => "end of input",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, col: usize) -> Self {
        Self { kind, line, col }
    }
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    /// Open `(` / `[` count; newlines inside brackets are ignored.
    nesting: usize,
    indent_stack: Vec<usize>,
    tokens: Vec<Token>,
    at_line_start: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            nesting: 0,
            indent_stack: vec![0],
            tokens: Vec::new(),
            at_line_start: true,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, line: usize, col: usize) {
        self.tokens.push(Token::new(kind, line, col));
    }

    fn last_is_line_break(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Indent) | Some(TokenKind::Dedent)
        )
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        loop {
            if self.at_line_start {
                self.at_line_start = false;
                self.handle_indentation()?;
            }
            let Some(ch) = self.current() else { break };
            let (line, col) = (self.line, self.col);
            match ch {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '#' => {
                    while !matches!(self.current(), None | Some('\n')) {
                        self.advance();
                    }
                }
                '\n' => {
                    self.advance();
                    if self.nesting == 0 {
                        if !self.last_is_line_break() {
                            self.push(TokenKind::Newline, line, col);
                        }
                        self.at_line_start = true;
                    }
                }
                '"' | '\'' => {
                    let tok = self.read_string(ch)?;
                    self.tokens.push(tok);
                }
                c if c.is_ascii_digit() => {
                    let tok = self.read_number()?;
                    self.tokens.push(tok);
                }
                c if c.is_alphabetic() || c == '_' => {
                    let tok = self.read_word();
                    self.tokens.push(tok);
                }
                _ => {
                    let kind = self.read_symbol(ch, line, col)?;
                    self.push(kind, line, col);
                }
            }
        }

        let (line, col) = (self.line, self.col);
        if !self.last_is_line_break() {
            self.push(TokenKind::Newline, line, col);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent, line, col);
        }
        self.push(TokenKind::Eof, line, col);
        Ok(self.tokens)
    }

    fn handle_indentation(&mut self) -> Result<(), SyntaxError> {
        let mut indent = 0;
        while let Some(ch) = self.current() {
            match ch {
                ' ' => indent += 1,
                '\t' => indent += 4,
                _ => break,
            }
            self.advance();
        }
        // Blank and comment-only lines never change indentation.
        if matches!(self.current(), None | Some('\n') | Some('\r') | Some('#')) {
            return Ok(());
        }

        let (line, col) = (self.line, self.col);
        let cur = self.indent_stack.last().copied().unwrap_or(0);
        if indent > cur {
            self.indent_stack.push(indent);
            self.push(TokenKind::Indent, line, col);
        } else if indent < cur {
            while let Some(&top) = self.indent_stack.last() {
                if top > indent {
                    self.indent_stack.pop();
                    self.push(TokenKind::Dedent, line, col);
                } else {
                    break;
                }
            }
            if self.indent_stack.last().copied() != Some(indent) {
                return Err(SyntaxError::InconsistentIndent { line });
            }
        }
        Ok(())
    }

    fn read_string(&mut self, quote: char) -> Result<Token, SyntaxError> {
        let (line, col) = (self.line, self.col);
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.current() {
                None | Some('\n') => return Err(SyntaxError::UnterminatedString { line, col }),
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some(c) if c == '\\' || c == '"' || c == '\'' => s.push(c),
                        Some(c) => {
                            s.push('\\');
                            s.push(c);
                        }
                        None => return Err(SyntaxError::UnterminatedString { line, col }),
                    }
                    self.advance();
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::new(TokenKind::Str(s), line, col))
    }

    fn read_number(&mut self) -> Result<Token, SyntaxError> {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();
        let mut is_float = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                text.push(ch);
            } else if ch == '.' && !is_float && matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                is_float = true;
                text.push(ch);
            } else if ch != '_' {
                break;
            }
            self.advance();
        }
        let kind = if is_float {
            text.parse::<f64>().map(TokenKind::Float).ok()
        } else {
            text.parse::<i64>().map(TokenKind::Int).ok()
        };
        kind.map(|k| Token::new(k, line, col))
            .ok_or(SyntaxError::InvalidNumber { line, col })
    }

    fn read_word(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let mut word = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        let kind = match word.as_str() {
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::NoneLit,
            "pass" => TokenKind::Pass,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            _ => TokenKind::Ident(word),
        };
        Token::new(kind, line, col)
    }

    fn read_symbol(&mut self, ch: char, line: usize, col: usize) -> Result<TokenKind, SyntaxError> {
        self.advance();
        let next = self.current();
        let two = |lexer: &mut Self, kind: TokenKind| {
            lexer.advance();
            kind
        };
        let kind = match (ch, next) {
            ('*', Some('*')) => two(self, TokenKind::StarStar),
            ('*', Some('=')) => two(self, TokenKind::StarAssign),
            ('/', Some('/')) => two(self, TokenKind::SlashSlash),
            ('+', Some('=')) => two(self, TokenKind::PlusAssign),
            ('-', Some('=')) => two(self, TokenKind::MinusAssign),
            ('=', Some('=')) => two(self, TokenKind::EqEq),
            ('!', Some('=')) => two(self, TokenKind::NotEq),
            ('<', Some('=')) => two(self, TokenKind::LtEq),
            ('>', Some('=')) => two(self, TokenKind::GtEq),
            ('(', _) => {
                self.nesting += 1;
                TokenKind::LParen
            }
            ('[', _) => {
                self.nesting += 1;
                TokenKind::LBracket
            }
            (')', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                TokenKind::RParen
            }
            (']', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                TokenKind::RBracket
            }
            (',', _) => TokenKind::Comma,
            (':', _) => TokenKind::Colon,
            ('.', _) => TokenKind::Dot,
            ('=', _) => TokenKind::Assign,
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            _ => return Err(SyntaxError::UnexpectedChar { ch, line, col }),
        };
        Ok(kind)
    }
}

/// Tokenize a whole source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).tokenize()
}
