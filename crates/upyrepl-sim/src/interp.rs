//! A tiny interpreter for the Python subset the host generates.
//!
//! Supported: `import`, assignment, expression statements, `pass`, `raise`,
//! `try`/`except`, and `with ... as ...` blocks; calls, attribute access,
//! `+`, string/bytes/int/list literals. Enough for file management snippets
//! and simple test programs, nothing more.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::vfs::{Errno, Vfs};

/// A Python exception raised on the simulated board.
#[derive(Debug, Clone, PartialEq)]
pub struct PyErr {
    /// Exception class, e.g. `OSError`.
    pub kind: String,
    /// Argument text, e.g. `[Errno 2] ENOENT`.
    pub message: String,
    /// 1-based source line the exception was raised on.
    pub line: usize,
}

impl PyErr {
    fn new(kind: &str, message: impl Into<String>) -> Self {
        PyErr {
            kind: kind.to_string(),
            message: message.into(),
            line: 0,
        }
    }

    fn os(errno: Errno) -> Self {
        PyErr::new("OSError", errno.to_string())
    }

    /// Traceback text in the layout MicroPython prints to the error section.
    pub fn traceback(&self) -> String {
        let mut text = String::from("Traceback (most recent call last):\r\n");
        text.push_str(&format!("  File \"<stdin>\", line {}, in <module>\r\n", self.line.max(1)));
        if self.message.is_empty() {
            text.push_str(&format!("{}: \r\n", self.kind));
        } else {
            text.push_str(&format!("{}: {}\r\n", self.kind, self.message));
        }
        text
    }
}

/// Non-local control flow out of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// An exception propagating outward.
    Raise(PyErr),
    /// `machine.reset()` was called.
    Reset,
}

impl From<PyErr> for Flow {
    fn from(err: PyErr) -> Self {
        Flow::Raise(err)
    }
}

type Exec<T> = Result<T, Flow>;

/// Runtime values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Module(&'static str),
    File(u32),
    Builtin(&'static str),
    Bound(Box<Value>, String),
    Exception(PyErr),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Module(_) => "module",
            Value::File(_) => "FileIO",
            Value::Builtin(_) | Value::Bound(..) => "function",
            Value::Exception(_) => "Exception",
        }
    }

    fn as_str(&self) -> Result<&str, PyErr> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(PyErr::new(
                "TypeError",
                format!("can't convert '{}' object to str implicitly", other.type_name()),
            )),
        }
    }

    fn as_int(&self) -> Result<i64, PyErr> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(PyErr::new("TypeError", format!("can't convert {} to int", other.type_name()))),
        }
    }

    fn as_buffer(&self) -> Result<Vec<u8>, PyErr> {
        match self {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Str(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(PyErr::new("TypeError", "object with buffer protocol required")),
        }
    }

    /// `str(value)`.
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Exception(e) => e.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Str(s) => repr_str(s),
            Value::Bytes(b) => repr_bytes(b),
            Value::List(items) => format!("[{}]", items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")),
            Value::Module(name) => format!("<module '{}'>", name),
            Value::File(fd) => format!("<io.FileIO {}>", fd),
            Value::Builtin(name) => format!("<function {}>", name),
            Value::Bound(_, name) => format!("<bound_method {}>", name),
            Value::Exception(e) => format!("{}('{}',)", e.kind, e.message),
        }
    }
}

fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::new();
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn repr_bytes(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::from("b");
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push(quote as char);
    out
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Assign,
    Plus,
    Colon,
}

fn syntax_error(message: &str) -> PyErr {
    PyErr::new("SyntaxError", message)
}

fn tokenize(line: &str) -> Result<Vec<Token>, PyErr> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '#' => break,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '\'' | '"' => {
                let (text, next) = lex_string(&chars, i)?;
                tokens.push(Token::Str(text));
                i = next;
            }
            'b' | 'B' if matches!(chars.get(i + 1), Some('\'') | Some('"')) => {
                let (text, next) = lex_string(&chars, i + 1)?;
                let mut bytes = Vec::with_capacity(text.len());
                for ch in text.chars() {
                    let code = ch as u32;
                    if code > 0xff {
                        return Err(syntax_error("bytes can only contain ASCII literal characters"));
                    }
                    bytes.push(code as u8);
                }
                tokens.push(Token::Bytes(bytes));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                let value = digits.parse().map_err(|_| syntax_error("invalid integer"))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            _ => return Err(syntax_error("invalid syntax")),
        }
    }
    Ok(tokens)
}

/// Lex a quoted literal starting at the opening quote. Escapes produce chars
/// with code points 0..=255 for `\xNN`.
fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), PyErr> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }
        let esc = *chars.get(i + 1).ok_or_else(|| syntax_error("unterminated string"))?;
        i += 2;
        match esc {
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            'x' => {
                let hex: String = chars.get(i..i + 2).ok_or_else(|| syntax_error("invalid \\x escape"))?.iter().collect();
                let code = u8::from_str_radix(&hex, 16).map_err(|_| syntax_error("invalid \\x escape"))?;
                out.push(code as char);
                i += 2;
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Err(syntax_error("unterminated string"))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Name(String),
    Const(Value),
    List(Vec<Expr>),
    Attr(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    Add(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), PyErr> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            _ => Err(syntax_error("invalid syntax")),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expr(&mut self) -> Result<Expr, PyErr> {
        let mut left = self.postfix()?;
        while self.peek() == Some(&Token::Plus) {
            self.pos += 1;
            let right = self.postfix()?;
            left = Expr::Add(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn postfix(&mut self) -> Result<Expr, PyErr> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Name(name)) => expr = Expr::Attr(Box::new(expr), name),
                        _ => return Err(syntax_error("invalid syntax")),
                    }
                }
                Some(Token::LParen) => {
                    self.pos += 1;
                    let args = self.sequence(Token::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn sequence(&mut self, close: Token) -> Result<Vec<Expr>, PyErr> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.expr()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(t) if t == close => return Ok(items),
                _ => return Err(syntax_error("invalid syntax")),
            }
        }
    }

    fn atom(&mut self) -> Result<Expr, PyErr> {
        match self.next() {
            Some(Token::Name(name)) => Ok(match name.as_str() {
                "None" => Expr::Const(Value::None),
                "True" => Expr::Const(Value::Int(1)),
                "False" => Expr::Const(Value::Int(0)),
                _ => Expr::Name(name),
            }),
            Some(Token::Int(n)) => Ok(Expr::Const(Value::Int(n))),
            Some(Token::Str(s)) => Ok(Expr::Const(Value::Str(s))),
            Some(Token::Bytes(b)) => Ok(Expr::Const(Value::Bytes(b))),
            Some(Token::LBracket) => Ok(Expr::List(self.sequence(Token::RBracket)?)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => Err(syntax_error("invalid syntax")),
        }
    }
}

fn parse_expr(text: &str) -> Result<Expr, PyErr> {
    let mut parser = Parser::new(tokenize(text)?);
    let expr = parser.expr()?;
    if !parser.at_end() {
        return Err(syntax_error("invalid syntax"));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Stmt {
    Simple { text: String, line: usize },
    Try { body: Vec<Stmt>, bind: Option<String>, handler: Vec<Stmt> },
    With { expr: String, bind: String, body: Vec<Stmt>, line: usize },
}

struct Line {
    indent: usize,
    text: String,
    number: usize,
}

fn split_lines(source: &str) -> Vec<Line> {
    source
        .split('\n')
        .enumerate()
        .filter_map(|(index, raw)| {
            let raw = raw.trim_end_matches('\r');
            let text = raw.trim_start();
            if text.is_empty() || text.starts_with('#') {
                return None;
            }
            Some(Line {
                indent: raw.len() - text.len(),
                text: text.trim_end().to_string(),
                number: index + 1,
            })
        })
        .collect()
}

fn parse_block(lines: &[Line], pos: &mut usize, indent: usize) -> Result<Vec<Stmt>, PyErr> {
    let mut block = Vec::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(PyErr { line: line.number, ..PyErr::new("IndentationError", "unexpected indent") });
        }
        *pos += 1;

        if line.text == "try:" {
            let body = parse_suite(lines, pos, indent, line.number)?;
            let handler_line = lines
                .get(*pos)
                .filter(|l| l.indent == indent && l.text.starts_with("except"))
                .ok_or_else(|| PyErr { line: line.number, ..syntax_error("invalid syntax") })?;
            let bind = parse_except(&handler_line.text)
                .map_err(|e| PyErr { line: handler_line.number, ..e })?;
            let number = handler_line.number;
            *pos += 1;
            let handler = parse_suite(lines, pos, indent, number)?;
            block.push(Stmt::Try { body, bind, handler });
        } else if let Some(rest) = line.text.strip_prefix("with ") {
            let header = rest
                .strip_suffix(':')
                .and_then(|h| h.rsplit_once(" as "))
                .ok_or_else(|| PyErr { line: line.number, ..syntax_error("invalid syntax") })?;
            let body = parse_suite(lines, pos, indent, line.number)?;
            block.push(Stmt::With {
                expr: header.0.trim().to_string(),
                bind: header.1.trim().to_string(),
                body,
                line: line.number,
            });
        } else {
            block.push(Stmt::Simple {
                text: line.text.clone(),
                line: line.number,
            });
        }
    }
    Ok(block)
}

fn parse_suite(lines: &[Line], pos: &mut usize, indent: usize, header: usize) -> Result<Vec<Stmt>, PyErr> {
    match lines.get(*pos) {
        Some(next) if next.indent > indent => parse_block(lines, pos, next.indent),
        _ => Err(PyErr { line: header, ..PyErr::new("IndentationError", "expected an indented block") }),
    }
}

/// `except:`, `except Exception:` or `except Exception as e:`.
fn parse_except(text: &str) -> Result<Option<String>, PyErr> {
    let header = text
        .strip_prefix("except")
        .and_then(|h| h.strip_suffix(':'))
        .ok_or_else(|| syntax_error("invalid syntax"))?;
    Ok(header.rsplit_once(" as ").map(|(_, name)| name.trim().to_string()))
}

/// Parse `source` into statements.
fn parse_program(source: &str) -> Result<Vec<Stmt>, PyErr> {
    let lines = split_lines(source);
    let mut pos = 0;
    let indent = lines.first().map_or(0, |l| l.indent);
    let block = parse_block(&lines, &mut pos, indent)?;
    if pos < lines.len() {
        return Err(PyErr { line: lines[pos].number, ..PyErr::new("IndentationError", "unindent doesn't match") });
    }
    Ok(block)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    binary: bool,
    readable: bool,
    position: usize,
    closed: bool,
}

/// A module function call made by a program, recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Qualified name, e.g. `os.remove`.
    pub function: String,
    /// `str()` of each argument.
    pub args: Vec<String>,
}

/// Interpreter state that survives between raw REPL commands until reset.
#[derive(Debug, Default)]
pub struct Interpreter {
    globals: HashMap<String, Value>,
    files: HashMap<u32, OpenFile>,
    next_fd: u32,
    stdout: Vec<u8>,
    calls: Vec<Call>,
}

impl Interpreter {
    /// Fresh interpreter with no globals and no open files.
    pub fn new() -> Self {
        Interpreter {
            next_fd: 3,
            ..Default::default()
        }
    }

    /// Number of files that were opened and not yet closed.
    pub fn open_file_count(&self) -> usize {
        self.files.values().filter(|f| !f.closed).count()
    }

    /// Module function calls made so far.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Forget recorded calls.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Run `source`, returning what it printed and how it ended.
    pub fn run(&mut self, source: &str, vfs: &mut Vfs) -> (Vec<u8>, Result<(), Flow>) {
        self.stdout.clear();
        let result = parse_program(source)
            .map_err(Flow::Raise)
            .and_then(|program| self.exec_block(&program, vfs));
        (std::mem::take(&mut self.stdout), result)
    }

    fn exec_block(&mut self, block: &[Stmt], vfs: &mut Vfs) -> Exec<()> {
        for stmt in block {
            self.exec_stmt(stmt, vfs)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt, vfs: &mut Vfs) -> Exec<()> {
        match stmt {
            Stmt::Simple { text, line } => self.exec_simple(text, vfs).map_err(|flow| at_line(flow, *line)),
            Stmt::Try { body, bind, handler } => match self.exec_block(body, vfs) {
                Err(Flow::Raise(err)) => {
                    if let Some(name) = bind {
                        self.globals.insert(name.clone(), Value::Exception(err));
                    }
                    self.exec_block(handler, vfs)
                }
                other => other,
            },
            Stmt::With { expr, bind, body, line } => {
                let value = parse_expr(expr)
                    .map_err(Flow::Raise)
                    .and_then(|e| self.eval(&e, vfs))
                    .map_err(|flow| at_line(flow, *line))?;
                self.globals.insert(bind.clone(), value.clone());
                let result = self.exec_block(body, vfs);
                if let Value::File(fd) = value {
                    if let Some(file) = self.files.get_mut(&fd) {
                        file.closed = true;
                    }
                }
                result
            }
        }
    }

    fn exec_simple(&mut self, text: &str, vfs: &mut Vfs) -> Exec<()> {
        if text == "pass" {
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("import ") {
            for item in rest.split(',') {
                let item = item.trim();
                let (module, alias) = item.split_once(" as ").unwrap_or((item, item));
                let value = Value::Module(module_name(module.trim())?);
                self.globals.insert(alias.trim().to_string(), value);
            }
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("raise") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Err(PyErr::new("RuntimeError", "no active exception to reraise").into());
            }
            return match self.eval(&parse_expr(rest)?, vfs)? {
                Value::Exception(err) => Err(Flow::Raise(PyErr { line: 0, ..err })),
                Value::Builtin(name) => Err(PyErr::new(name, "").into()),
                _ => Err(PyErr::new("TypeError", "exceptions must derive from BaseException").into()),
            };
        }

        let tokens = tokenize(text)?;
        if let [Token::Name(name), Token::Assign, ..] = tokens.as_slice() {
            let name = name.clone();
            let mut parser = Parser::new(tokens[2..].to_vec());
            let expr = parser.expr()?;
            if !parser.at_end() {
                return Err(syntax_error("invalid syntax").into());
            }
            let value = self.eval(&expr, vfs)?;
            self.globals.insert(name, value);
            return Ok(());
        }

        let mut parser = Parser::new(tokens);
        let expr = parser.expr()?;
        if !parser.at_end() {
            return Err(syntax_error("invalid syntax").into());
        }
        self.eval(&expr, vfs)?;
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, vfs: &mut Vfs) -> Exec<Value> {
        match expr {
            Expr::Const(value) => Ok(value.clone()),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let values = items.iter().map(|e| self.eval(e, vfs)).collect::<Exec<Vec<_>>>()?;
                Ok(Value::List(values))
            }
            Expr::Attr(target, name) => {
                let target = self.eval(target, vfs)?;
                Ok(Value::Bound(Box::new(target), name.clone()))
            }
            Expr::Add(left, right) => {
                let left = self.eval(left, vfs)?;
                let right = self.eval(right, vfs)?;
                add(left, right).map_err(Flow::Raise)
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee, vfs)?;
                let args = args.iter().map(|e| self.eval(e, vfs)).collect::<Exec<Vec<_>>>()?;
                match callee {
                    Value::Builtin(name) => self.call_builtin(name, args, vfs),
                    Value::Bound(target, method) => self.call_method(*target, &method, args, vfs),
                    other => Err(PyErr::new("TypeError", format!("'{}' object isn't callable", other.type_name())).into()),
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Exec<Value> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        let builtin = match name {
            "print" => "print",
            "open" => "open",
            "exec" => "exec",
            "len" => "len",
            "str" => "str",
            "repr" => "repr",
            "Exception" => "Exception",
            "OSError" => "OSError",
            "KeyboardInterrupt" => "KeyboardInterrupt",
            _ => return Err(PyErr::new("NameError", format!("name '{}' isn't defined", name)).into()),
        };
        Ok(Value::Builtin(builtin))
    }

    fn call_builtin(&mut self, name: &str, args: Vec<Value>, vfs: &mut Vfs) -> Exec<Value> {
        match name {
            "print" => {
                let text = args.iter().map(Value::to_display).collect::<Vec<_>>().join(" ");
                self.stdout.extend_from_slice(text.as_bytes());
                self.stdout.extend_from_slice(b"\r\n");
                Ok(Value::None)
            }
            "open" => {
                let path = arg(&args, 0)?.as_str()?.to_string();
                let mode = match args.get(1) {
                    Some(mode) => mode.as_str()?.to_string(),
                    None => "r".to_string(),
                };
                self.open(&path, &mode, vfs)
            }
            "exec" => {
                let source = arg(&args, 0)?;
                let source = match source {
                    Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                    other => other.as_str()?.to_string(),
                };
                let program = parse_program(&source)?;
                self.exec_block(&program, vfs)?;
                Ok(Value::None)
            }
            "len" => match arg(&args, 0)? {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Bytes(b) => Ok(Value::Int(b.len() as i64)),
                Value::List(v) | Value::Tuple(v) => Ok(Value::Int(v.len() as i64)),
                other => Err(PyErr::new("TypeError", format!("object of type '{}' has no len()", other.type_name())).into()),
            },
            "str" => Ok(Value::Str(arg(&args, 0)?.to_display())),
            "repr" => Ok(Value::Str(arg(&args, 0)?.repr())),
            kind => {
                let message = args.first().map(Value::to_display).unwrap_or_default();
                Ok(Value::Exception(PyErr::new(kind, message)))
            }
        }
    }

    fn call_method(&mut self, target: Value, method: &str, args: Vec<Value>, vfs: &mut Vfs) -> Exec<Value> {
        match target {
            Value::Module(module) => self.call_module(module, method, args, vfs),
            Value::File(fd) => self.call_file(fd, method, args, vfs),
            Value::Str(s) => match method {
                "join" => {
                    let items = match arg(&args, 0)? {
                        Value::List(v) | Value::Tuple(v) => v.clone(),
                        other => return Err(PyErr::new("TypeError", format!("'{}' object isn't iterable", other.type_name())).into()),
                    };
                    let parts = items.iter().map(|v| v.as_str().map(str::to_string)).collect::<Result<Vec<_>, _>>()?;
                    Ok(Value::Str(parts.join(&s)))
                }
                "strip" => Ok(Value::Str(s.trim().to_string())),
                "encode" => Ok(Value::Bytes(s.into_bytes())),
                _ => Err(no_attribute("str", method)),
            },
            Value::Bytes(b) => match method {
                "strip" => {
                    let start = b.iter().position(|c| !c.is_ascii_whitespace()).unwrap_or(b.len());
                    let end = b.iter().rposition(|c| !c.is_ascii_whitespace()).map_or(start, |e| e + 1);
                    Ok(Value::Bytes(b[start..end].to_vec()))
                }
                "decode" => Ok(Value::Str(String::from_utf8_lossy(&b).into_owned())),
                _ => Err(no_attribute("bytes", method)),
            },
            Value::Exception(err) => Err(no_attribute(&err.kind, method)),
            other => Err(no_attribute(other.type_name(), method)),
        }
    }

    fn call_module(&mut self, module: &str, function: &str, args: Vec<Value>, vfs: &mut Vfs) -> Exec<Value> {
        self.calls.push(Call {
            function: format!("{}.{}", module, function),
            args: args.iter().map(Value::to_display).collect(),
        });
        let path = |index: usize| -> Result<String, PyErr> { Ok(arg(&args, index)?.as_str()?.to_string()) };
        let os = |r: Result<(), Errno>| r.map(|_| Value::None).map_err(|e| Flow::Raise(PyErr::os(e)));
        match (module, function) {
            ("os", "listdir") => {
                let dir = match args.first() {
                    Some(_) => path(0)?,
                    None => vfs.getcwd(),
                };
                let names = vfs.listdir(&dir).map_err(PyErr::os)?;
                Ok(Value::List(names.into_iter().map(Value::Str).collect()))
            }
            ("os", "stat") => {
                let stat = vfs.stat(&path(0)?).map_err(PyErr::os)?;
                let mode = if stat.is_dir { 0x4000 } else { 0x8000 };
                let mut fields = vec![Value::Int(mode)];
                fields.extend((0..5).map(|_| Value::Int(0)));
                fields.push(Value::Int(stat.size as i64));
                fields.extend((0..3).map(|_| Value::Int(0)));
                Ok(Value::Tuple(fields))
            }
            ("os", "mkdir") => os(vfs.mkdir(&path(0)?)),
            ("os", "rmdir") => os(vfs.rmdir(&path(0)?)),
            ("os", "remove") => os(vfs.remove(&path(0)?)),
            ("os", "rename") => os(vfs.rename(&path(0)?, &path(1)?)),
            ("os", "chdir") => os(vfs.chdir(&path(0)?)),
            ("os", "getcwd") => Ok(Value::Str(vfs.getcwd())),
            ("ubinascii", "b2a_base64") => {
                let mut encoded = STANDARD.encode(arg(&args, 0)?.as_buffer()?).into_bytes();
                encoded.push(b'\n');
                Ok(Value::Bytes(encoded))
            }
            ("ubinascii", "a2b_base64") => {
                let input = arg(&args, 0)?.as_buffer()?;
                let trimmed: Vec<u8> = input.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
                STANDARD
                    .decode(trimmed)
                    .map(Value::Bytes)
                    .map_err(|_| PyErr::new("ValueError", "incorrect padding").into())
            }
            ("ubinascii", "hexlify") => {
                let bytes = arg(&args, 0)?.as_buffer()?;
                Ok(Value::Bytes(bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>().into_bytes()))
            }
            ("machine", "reset") | ("machine", "soft_reset") => Err(Flow::Reset),
            ("time", "sleep") | ("time", "sleep_ms") | ("time", "sleep_us") => Ok(Value::None),
            ("gc", "collect") => Ok(Value::None),
            (module, function) => Err(no_attribute(module, function)),
        }
    }

    fn open(&mut self, path: &str, mode: &str, vfs: &mut Vfs) -> Exec<Value> {
        let binary = mode.contains('b');
        let readable = mode.starts_with('r');
        let path = format!("/{}", vfs.resolve(path).join("/"));
        if readable {
            vfs.read(&path).map_err(PyErr::os)?;
        } else if mode.starts_with('w') {
            vfs.truncate(&path).map_err(PyErr::os)?;
        } else if mode.starts_with('a') {
            if vfs.stat(&path).is_err() {
                vfs.truncate(&path).map_err(PyErr::os)?;
            }
        } else {
            return Err(PyErr::new("ValueError", "invalid mode").into());
        }
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(
            fd,
            OpenFile {
                path,
                binary,
                readable,
                position: 0,
                closed: false,
            },
        );
        Ok(Value::File(fd))
    }

    fn call_file(&mut self, fd: u32, method: &str, args: Vec<Value>, vfs: &mut Vfs) -> Exec<Value> {
        let file = self.files.get_mut(&fd).ok_or_else(|| PyErr::os(Errno::BadF))?;
        if method == "close" {
            file.closed = true;
            return Ok(Value::None);
        }
        if file.closed {
            return Err(PyErr::os(Errno::BadF).into());
        }
        match method {
            "read" => {
                if !file.readable {
                    return Err(PyErr::os(Errno::BadF).into());
                }
                let data = vfs.read(&file.path).map_err(PyErr::os)?;
                let start = file.position.min(data.len());
                let end = match args.first().map(Value::as_int).transpose()? {
                    Some(n) if n >= 0 => (start + n as usize).min(data.len()),
                    _ => data.len(),
                };
                let chunk = data[start..end].to_vec();
                file.position = end;
                if file.binary {
                    Ok(Value::Bytes(chunk))
                } else {
                    Ok(Value::Str(String::from_utf8_lossy(&chunk).into_owned()))
                }
            }
            "write" => {
                if file.readable {
                    return Err(PyErr::os(Errno::BadF).into());
                }
                let data = arg(&args, 0)?.as_buffer()?;
                vfs.append(&file.path, &data).map_err(PyErr::os)?;
                Ok(Value::Int(data.len() as i64))
            }
            "flush" => Ok(Value::None),
            _ => Err(no_attribute("FileIO", method)),
        }
    }
}

fn at_line(flow: Flow, line: usize) -> Flow {
    match flow {
        Flow::Raise(err) if err.line == 0 => Flow::Raise(PyErr { line, ..err }),
        other => other,
    }
}

fn arg(args: &[Value], index: usize) -> Result<&Value, PyErr> {
    args.get(index)
        .ok_or_else(|| PyErr::new("TypeError", "function missing required positional argument"))
}

fn no_attribute(owner: &str, name: &str) -> Flow {
    Flow::Raise(PyErr::new(
        "AttributeError",
        format!("'{}' object has no attribute '{}'", owner, name),
    ))
}

fn module_name(name: &str) -> Result<&'static str, PyErr> {
    match name {
        "os" | "uos" => Ok("os"),
        "ubinascii" | "binascii" => Ok("ubinascii"),
        "machine" => Ok("machine"),
        "time" | "utime" => Ok("time"),
        "gc" => Ok("gc"),
        other => Err(PyErr::new("ImportError", format!("no module named '{}'", other))),
    }
}

fn add(left: Value, right: Value) -> Result<Value, PyErr> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (Value::Bytes(mut a), Value::Bytes(b)) => {
            a.extend(b);
            Ok(Value::Bytes(a))
        }
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (a, b) => Err(PyErr::new(
            "TypeError",
            format!("unsupported types for __add__: '{}', '{}'", a.type_name(), b.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(interp: &mut Interpreter, vfs: &mut Vfs, source: &str) -> (String, Result<(), Flow>) {
        let (out, result) = interp.run(source, vfs);
        (String::from_utf8(out).unwrap(), result)
    }

    #[test]
    fn test_print_and_arithmetic() {
        let mut interp = Interpreter::new();
        let mut vfs = Vfs::new();
        let (out, result) = run(&mut interp, &mut vfs, "x = 40\nprint(x + 2, 'ok')");
        assert!(result.is_ok());
        assert_eq!(out, "42 ok\r\n");
    }

    #[test]
    fn test_globals_survive_between_runs() {
        let mut interp = Interpreter::new();
        let mut vfs = Vfs::new();
        run(&mut interp, &mut vfs, "import os\nname = 'a'");
        let (out, _) = run(&mut interp, &mut vfs, "print(name)");
        assert_eq!(out, "a\r\n");
    }

    #[test]
    fn test_oserror_line_and_text() {
        let mut interp = Interpreter::new();
        let mut vfs = Vfs::new();
        let (_, result) = run(&mut interp, &mut vfs, "import os\nos.listdir('/nope')");
        match result {
            Err(Flow::Raise(err)) => {
                assert_eq!(err.kind, "OSError");
                assert_eq!(err.line, 2);
                assert!(err.traceback().ends_with("OSError: [Errno 2] ENOENT\r\n"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_try_except_reraise() {
        let mut interp = Interpreter::new();
        let mut vfs = Vfs::new();
        let source = "f = open('/x', 'wb')\ntry:\n    f.write(1)\nexcept Exception as e:\n    f.close()\n    raise e";
        let (_, result) = run(&mut interp, &mut vfs, source);
        assert!(matches!(result, Err(Flow::Raise(ref e)) if e.kind == "TypeError"));
        assert_eq!(interp.open_file_count(), 0);
    }

    #[test]
    fn test_bytes_literals_with_escapes() {
        let mut interp = Interpreter::new();
        let mut vfs = Vfs::new();
        let source = "f = open('/bin', 'wb')\nf.write(b'\\x00\\x04\\x27\\x5C')\nf.close()";
        let (_, result) = run(&mut interp, &mut vfs, source);
        assert!(result.is_ok());
        assert_eq!(vfs.read("/bin").unwrap(), &[0x00, 0x04, 0x27, 0x5c]);
    }

    #[test]
    fn test_base64_chunked_read() {
        let mut interp = Interpreter::new();
        let mut vfs = Vfs::new();
        vfs.truncate("/d").unwrap();
        vfs.append("/d", b"hello").unwrap();
        let source = "import ubinascii\nf = open('/d', 'rb')\nprint(ubinascii.b2a_base64(f.read(3)).strip())";
        let (out, _) = run(&mut interp, &mut vfs, source);
        assert_eq!(out, "b'aGVs'\r\n");
    }

    #[test]
    fn test_with_block_closes_file() {
        let mut interp = Interpreter::new();
        let mut vfs = Vfs::new();
        let (_, result) = run(&mut interp, &mut vfs, "with open('/t', 'w') as f:\n    pass");
        assert!(result.is_ok());
        assert_eq!(interp.open_file_count(), 0);
        assert!(vfs.read("/t").unwrap().is_empty());
    }

    #[test]
    fn test_machine_reset_flow() {
        let mut interp = Interpreter::new();
        let mut vfs = Vfs::new();
        let (_, result) = run(&mut interp, &mut vfs, "import machine\nmachine.reset()");
        assert_eq!(result, Err(Flow::Reset));
    }

    #[test]
    fn test_bytes_repr() {
        assert_eq!(Value::Bytes(b"a'b".to_vec()).repr(), "b\"a'b\"");
        assert_eq!(Value::Bytes(vec![0, b'\\']).repr(), "b'\\x00\\\\'");
    }
}
