//! Executes error page templates written in Go template syntax.
//!
//! Supported actions:
//!
//! - field output such as `{{ .Code }}`, `{{ .Details.ServiceName }}` or
//!   `{{ .Details.CustomFields.team }}`;
//! - `if` / `else if` / `else`, `range` over maps and `with`, each closed by
//!   `{{ end }}`;
//! - variables (`$name := ...`, `range $key, $value := ...`, `$` for the page);
//! - the functions `eq`, `ne`, `lt`, `le`, `gt`, `ge`, `not`, `and`, `or`,
//!   `len` and `index`, with parentheses and `|` pipes;
//! - comments and `{{-` / `-}}` trim markers;
//! - `{{ template "style.css" . }}`, which inlines the stylesheet.
//!
//! Unknown fields render as an empty string. A template that does not parse
//! or fails to execute is an error. Output is not escaped.

use crate::context::PageContext;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const GENERIC_STYLESHEET: &str = "style.css";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("unexpected {{{{ {0} }}}}")]
    Unexpected(String),
    #[error("{0} action is missing its end")]
    Unclosed(&'static str),
    #[error("malformed action {0:?}")]
    Malformed(String),
    #[error("function {0:?} not defined")]
    UnknownFunction(String),
    #[error("wrong number of arguments for {0}")]
    Arity(&'static str),
    #[error("undefined variable {0}")]
    UndefinedVariable(String),
    #[error("incompatible types for comparison in {0}")]
    Incomparable(&'static str),
    #[error("invalid argument for {0}")]
    InvalidArgument(&'static str),
    #[error("range can't iterate over {0}")]
    NotIterable(String),
}

/// The stylesheet paired with a template, addressed by file name.
pub struct Stylesheet<'a> {
    pub name: &'a str,
    pub contents: &'a str,
}

/// A value produced while executing a template.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Map(BTreeMap<String, String>),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    /// Map keys that are not present read as an empty string.
    fn field(self, name: &str) -> Value {
        match self {
            Value::Map(map) => Value::Str(map.get(name).cloned().unwrap_or_default()),
            _ => Value::Nil,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Map(map) => {
                f.write_str("map[")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

pub fn render(
    template: &str,
    stylesheet: &Stylesheet<'_>,
    context: &PageContext,
) -> Result<String, TemplateError> {
    let nodes = parse(template)?;
    let mut exec = Exec {
        context,
        stylesheet,
        variables: Vec::new(),
        out: String::with_capacity(template.len() + stylesheet.contents.len()),
    };
    exec.walk(&nodes, &Dot::Page)?;
    Ok(exec.out)
}

enum Token<'t> {
    Text(&'t str),
    Action(&'t str),
}

fn lex(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = template;
    let mut trim_next = false;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        // Unterminated action, the remainder is kept verbatim
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };

        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        let mut action = &after_open[..end];
        if let Some(stripped) = action
            .strip_prefix('-')
            .filter(|a| a.starts_with(char::is_whitespace))
        {
            text = text.trim_end();
            action = stripped;
        }
        trim_next = false;
        if let Some(stripped) = action
            .strip_suffix('-')
            .filter(|a| a.ends_with(char::is_whitespace))
        {
            trim_next = true;
            action = stripped;
        }

        if !text.is_empty() {
            tokens.push(Token::Text(text));
        }
        tokens.push(Token::Action(action.trim()));
        rest = &after_open[end + CLOSE.len()..];
    }

    if trim_next {
        rest = rest.trim_start();
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    tokens
}

#[derive(Debug)]
enum Node<'t> {
    Text(&'t str),
    Output(Pipeline),
    Include(String),
    If {
        branches: Vec<(Pipeline, Vec<Node<'t>>)>,
        otherwise: Vec<Node<'t>>,
    },
    Range {
        pipeline: Pipeline,
        body: Vec<Node<'t>>,
        otherwise: Vec<Node<'t>>,
    },
    With {
        pipeline: Pipeline,
        body: Vec<Node<'t>>,
        otherwise: Vec<Node<'t>>,
    },
}

/// How a list of nodes ended.
enum Stop<'t> {
    Eof,
    End,
    Else(&'t str),
}

fn parse(template: &str) -> Result<Vec<Node<'_>>, TemplateError> {
    let tokens = lex(template);
    let mut pos = 0;
    match parse_list(&tokens, &mut pos)? {
        (nodes, Stop::Eof) => Ok(nodes),
        (_, Stop::End) => Err(TemplateError::Unexpected("end".into())),
        (_, Stop::Else(_)) => Err(TemplateError::Unexpected("else".into())),
    }
}

fn parse_list<'t>(
    tokens: &[Token<'t>],
    pos: &mut usize,
) -> Result<(Vec<Node<'t>>, Stop<'t>), TemplateError> {
    let mut nodes = Vec::new();

    while let Some(token) = tokens.get(*pos) {
        *pos += 1;
        let action = match token {
            Token::Text(text) => {
                nodes.push(Node::Text(*text));
                continue;
            }
            Token::Action(action) => *action,
        };
        if action.starts_with("/*") && action.ends_with("*/") {
            continue;
        }

        let (keyword, rest) = action
            .split_once(char::is_whitespace)
            .map_or((action, ""), |(keyword, rest)| (keyword, rest.trim()));
        match keyword {
            "end" if rest.is_empty() => return Ok((nodes, Stop::End)),
            "else" => return Ok((nodes, Stop::Else(rest))),
            "if" => nodes.push(parse_if(rest, tokens, pos)?),
            "range" => {
                let pipeline = parse_pipeline(rest)?;
                let (body, otherwise) = parse_block("range", tokens, pos)?;
                nodes.push(Node::Range {
                    pipeline,
                    body,
                    otherwise,
                });
            }
            "with" => {
                let pipeline = parse_pipeline(rest)?;
                let (body, otherwise) = parse_block("with", tokens, pos)?;
                nodes.push(Node::With {
                    pipeline,
                    body,
                    otherwise,
                });
            }
            "template" => {
                let name = quoted(rest).ok_or_else(|| TemplateError::Malformed(action.into()))?;
                nodes.push(Node::Include(name.to_string()));
            }
            "end" | "define" | "block" | "break" | "continue" => {
                return Err(TemplateError::Unexpected(action.into()));
            }
            _ => nodes.push(Node::Output(parse_pipeline(action)?)),
        }
    }

    Ok((nodes, Stop::Eof))
}

fn parse_if<'t>(
    condition: &str,
    tokens: &[Token<'t>],
    pos: &mut usize,
) -> Result<Node<'t>, TemplateError> {
    let mut branches = Vec::new();
    let mut condition = condition.to_string();

    loop {
        let pipeline = parse_pipeline(&condition)?;
        let (body, stop) = parse_list(tokens, pos)?;
        branches.push((pipeline, body));

        match stop {
            Stop::End => {
                return Ok(Node::If {
                    branches,
                    otherwise: Vec::new(),
                });
            }
            Stop::Else("") => {
                let otherwise = parse_tail("if", tokens, pos)?;
                return Ok(Node::If {
                    branches,
                    otherwise,
                });
            }
            Stop::Else(rest) => match rest.strip_prefix("if") {
                Some(next) if next.starts_with(char::is_whitespace) => {
                    condition = next.trim().to_string();
                }
                _ => return Err(TemplateError::Malformed(format!("else {rest}"))),
            },
            Stop::Eof => return Err(TemplateError::Unclosed("if")),
        }
    }
}

fn parse_block<'t>(
    kind: &'static str,
    tokens: &[Token<'t>],
    pos: &mut usize,
) -> Result<(Vec<Node<'t>>, Vec<Node<'t>>), TemplateError> {
    match parse_list(tokens, pos)? {
        (body, Stop::End) => Ok((body, Vec::new())),
        (body, Stop::Else("")) => Ok((body, parse_tail(kind, tokens, pos)?)),
        (_, Stop::Else(rest)) => Err(TemplateError::Malformed(format!("else {rest}"))),
        (_, Stop::Eof) => Err(TemplateError::Unclosed(kind)),
    }
}

/// The `else` part of a block, which must be closed by `end`.
fn parse_tail<'t>(
    kind: &'static str,
    tokens: &[Token<'t>],
    pos: &mut usize,
) -> Result<Vec<Node<'t>>, TemplateError> {
    match parse_list(tokens, pos)? {
        (nodes, Stop::End) => Ok(nodes),
        (_, Stop::Else(_)) => Err(TemplateError::Unexpected("else".into())),
        (_, Stop::Eof) => Err(TemplateError::Unclosed(kind)),
    }
}

fn quoted(args: &str) -> Option<&str> {
    let args = args.trim_start().strip_prefix('"')?;
    let end = args.find('"')?;
    Some(&args[..end])
}

#[derive(Debug, PartialEq)]
enum Word<'t> {
    Field(&'t str),
    Variable(&'t str),
    Ident(&'t str),
    Str(String),
    Int(i64),
    Open,
    Close,
    Pipe,
    Comma,
    Declare,
}

fn split_words(action: &str) -> Result<Vec<Word<'_>>, TemplateError> {
    let malformed = || TemplateError::Malformed(action.to_string());
    let bytes = action.as_bytes();
    let mut words = Vec::new();
    let mut i = 0;

    while let Some(&b) = bytes.get(i) {
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                words.push(Word::Open);
                i += 1;
            }
            b')' => {
                words.push(Word::Close);
                i += 1;
            }
            b'|' => {
                words.push(Word::Pipe);
                i += 1;
            }
            b',' => {
                words.push(Word::Comma);
                i += 1;
            }
            b':' if bytes.get(i + 1) == Some(&b'=') => {
                words.push(Word::Declare);
                i += 2;
            }
            b'"' => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match bytes.get(j) {
                        None => return Err(malformed()),
                        Some(b'"') => break,
                        Some(b'\\') => {
                            match bytes.get(j + 1) {
                                Some(b'n') => value.push('\n'),
                                Some(b't') => value.push('\t'),
                                Some(&escaped @ (b'"' | b'\\')) => value.push(escaped as char),
                                _ => return Err(malformed()),
                            }
                            j += 2;
                        }
                        Some(_) => {
                            let Some(ch) = action[j..].chars().next() else {
                                return Err(malformed());
                            };
                            value.push(ch);
                            j += ch.len_utf8();
                        }
                    }
                }
                words.push(Word::Str(value));
                i = j + 1;
            }
            b'`' => {
                let raw = &action[i + 1..];
                let end = raw.find('`').ok_or_else(malformed)?;
                words.push(Word::Str(raw[..end].to_string()));
                i += end + 2;
            }
            _ => {
                let end = action[i..]
                    .find(|ch: char| ch.is_whitespace() || "()|,\"`".contains(ch))
                    .map_or(action.len(), |n| i + n);
                words.push(classify(&action[i..end]).ok_or_else(malformed)?);
                i = end;
            }
        }
    }

    Ok(words)
}

fn classify(word: &str) -> Option<Word<'_>> {
    if word.starts_with('.') {
        return Some(Word::Field(word));
    }
    if word.starts_with('$') {
        return Some(Word::Variable(word));
    }
    if let Ok(n) = word.parse::<i64>() {
        return Some(Word::Int(n));
    }
    let mut chars = word.chars();
    let first = chars.next()?;
    if (first.is_alphabetic() || first == '_') && chars.all(|c| c.is_alphanumeric() || c == '_') {
        return Some(Word::Ident(word));
    }
    None
}

fn segments(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug)]
enum Operand {
    /// Relative to the current dot; empty for the dot itself.
    Field(Vec<String>),
    Variable(String, Vec<String>),
    Literal(Value),
    Nested(Box<Pipeline>),
}

#[derive(Clone, Copy, Debug)]
enum Function {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    And,
    Or,
    Len,
    Index,
}

#[derive(Debug)]
struct Command {
    function: Option<Function>,
    args: Vec<Operand>,
}

#[derive(Debug)]
struct Pipeline {
    source: String,
    declare: Vec<String>,
    commands: Vec<Command>,
}

fn parse_pipeline(action: &str) -> Result<Pipeline, TemplateError> {
    let words = split_words(action)?;
    let mut pos = 0;
    let pipeline = pipeline(&words, &mut pos, action)?;
    if pos != words.len() {
        return Err(TemplateError::Malformed(action.to_string()));
    }
    Ok(pipeline)
}

fn pipeline(words: &[Word<'_>], pos: &mut usize, source: &str) -> Result<Pipeline, TemplateError> {
    let declare = declaration(&words[*pos..]);
    *pos += declare.len() * 2;

    let mut commands = vec![command(words, pos, source)?];
    while let Some(Word::Pipe) = words.get(*pos) {
        *pos += 1;
        commands.push(command(words, pos, source)?);
    }

    Ok(Pipeline {
        source: source.to_string(),
        declare,
        commands,
    })
}

/// `$a :=` or `$a, $b :=` at the start of a pipeline.
fn declaration(words: &[Word<'_>]) -> Vec<String> {
    let mut names = Vec::new();
    for pair in words.chunks(2) {
        match pair {
            [Word::Variable(name), Word::Comma] => names.push(name.to_string()),
            [Word::Variable(name), Word::Declare] => {
                names.push(name.to_string());
                return names;
            }
            _ => break,
        }
    }
    Vec::new()
}

fn command(words: &[Word<'_>], pos: &mut usize, source: &str) -> Result<Command, TemplateError> {
    let function = match words.get(*pos) {
        Some(Word::Ident(name)) if !matches!(*name, "true" | "false" | "nil") => {
            *pos += 1;
            Some(
                Function::from_name(name)
                    .ok_or_else(|| TemplateError::UnknownFunction(name.to_string()))?,
            )
        }
        _ => None,
    };

    let mut args = Vec::new();
    while let Some(word) = words.get(*pos) {
        if matches!(word, Word::Pipe | Word::Close) {
            break;
        }
        args.push(operand(words, pos, source)?);
    }

    if function.is_none() && args.len() != 1 {
        return Err(TemplateError::Malformed(source.to_string()));
    }
    Ok(Command { function, args })
}

fn operand(words: &[Word<'_>], pos: &mut usize, source: &str) -> Result<Operand, TemplateError> {
    let malformed = || TemplateError::Malformed(source.to_string());
    let word = words.get(*pos).ok_or_else(malformed)?;
    *pos += 1;

    Ok(match word {
        Word::Field(path) => Operand::Field(segments(path)),
        Word::Variable(path) => match path.split_once('.') {
            Some((name, rest)) => Operand::Variable(name.to_string(), segments(rest)),
            None => Operand::Variable(path.to_string(), Vec::new()),
        },
        Word::Str(s) => Operand::Literal(Value::Str(s.clone())),
        Word::Int(n) => Operand::Literal(Value::Int(*n)),
        Word::Ident("true") => Operand::Literal(Value::Bool(true)),
        Word::Ident("false") => Operand::Literal(Value::Bool(false)),
        Word::Ident("nil") => Operand::Literal(Value::Nil),
        Word::Open => {
            let inner = pipeline(words, pos, source)?;
            if words.get(*pos) != Some(&Word::Close) {
                return Err(malformed());
            }
            *pos += 1;
            Operand::Nested(Box::new(inner))
        }
        _ => return Err(malformed()),
    })
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Function::Eq,
            "ne" => Function::Ne,
            "lt" => Function::Lt,
            "le" => Function::Le,
            "gt" => Function::Gt,
            "ge" => Function::Ge,
            "not" => Function::Not,
            "and" => Function::And,
            "or" => Function::Or,
            "len" => Function::Len,
            "index" => Function::Index,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Function::Eq => "eq",
            Function::Ne => "ne",
            Function::Lt => "lt",
            Function::Le => "le",
            Function::Gt => "gt",
            Function::Ge => "ge",
            Function::Not => "not",
            Function::And => "and",
            Function::Or => "or",
            Function::Len => "len",
            Function::Index => "index",
        }
    }

    fn call(self, mut args: Vec<Value>) -> Result<Value, TemplateError> {
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(TemplateError::Arity(self.name()))
            }
        };

        match self {
            Function::Eq => {
                let Some((first, rest)) = args.split_first() else {
                    return Err(TemplateError::Arity(self.name()));
                };
                if rest.is_empty() {
                    return Err(TemplateError::Arity(self.name()));
                }
                for other in rest {
                    if self.equals(first, other)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Function::Ne => {
                arity(2)?;
                Ok(Value::Bool(!self.equals(&args[0], &args[1])?))
            }
            Function::Lt | Function::Le | Function::Gt | Function::Ge => {
                arity(2)?;
                let ordering = self.compare(&args[0], &args[1])?;
                Ok(Value::Bool(match self {
                    Function::Lt => ordering.is_lt(),
                    Function::Le => ordering.is_le(),
                    Function::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            Function::Not => {
                arity(1)?;
                Ok(Value::Bool(!args[0].truthy()))
            }
            // `and` yields the first falsy argument, `or` the first truthy
            // one, both fall back to the last argument.
            Function::And | Function::Or => {
                let want = matches!(self, Function::Or);
                let Some(last) = args.pop() else {
                    return Err(TemplateError::Arity(self.name()));
                };
                Ok(args
                    .into_iter()
                    .find(|arg| arg.truthy() == want)
                    .unwrap_or(last))
            }
            Function::Len => {
                arity(1)?;
                match &args[0] {
                    Value::Str(s) => Ok(Value::Int(s.len() as i64)),
                    Value::Map(map) => Ok(Value::Int(map.len() as i64)),
                    _ => Err(TemplateError::InvalidArgument(self.name())),
                }
            }
            Function::Index => {
                arity(2)?;
                let key = args.pop();
                match (args.pop(), key) {
                    (Some(map @ Value::Map(_)), Some(Value::Str(key))) => Ok(map.field(&key)),
                    _ => Err(TemplateError::InvalidArgument(self.name())),
                }
            }
        }
    }

    fn equals(self, a: &Value, b: &Value) -> Result<bool, TemplateError> {
        match (a, b) {
            (Value::Nil, Value::Nil) => Ok(true),
            (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
            (Value::Int(x), Value::Int(y)) => Ok(x == y),
            (Value::Str(x), Value::Str(y)) => Ok(x == y),
            _ => Err(TemplateError::Incomparable(self.name())),
        }
    }

    fn compare(self, a: &Value, b: &Value) -> Result<Ordering, TemplateError> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
            (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
            _ => Err(TemplateError::Incomparable(self.name())),
        }
    }
}

enum Dot {
    Page,
    Value(Value),
}

struct Exec<'a> {
    context: &'a PageContext,
    stylesheet: &'a Stylesheet<'a>,
    variables: Vec<(String, Value)>,
    out: String,
}

impl Exec<'_> {
    fn walk(&mut self, nodes: &[Node<'_>], dot: &Dot) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Output(pipeline) => {
                    let value = self.pipeline(pipeline, dot)?;
                    if pipeline.declare.is_empty() {
                        self.out.push_str(&value.to_string());
                    }
                }
                Node::Include(name) => {
                    if name == self.stylesheet.name || name == GENERIC_STYLESHEET {
                        self.out.push_str(self.stylesheet.contents);
                    } else {
                        tracing::debug!(template = %name, "Unknown nested template");
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mark = self.variables.len();
                    let mut chosen = otherwise.as_slice();
                    for (condition, body) in branches {
                        if self.pipeline(condition, dot)?.truthy() {
                            chosen = body.as_slice();
                            break;
                        }
                    }
                    self.walk(chosen, dot)?;
                    self.variables.truncate(mark);
                }
                Node::With {
                    pipeline,
                    body,
                    otherwise,
                } => {
                    let mark = self.variables.len();
                    let value = self.pipeline(pipeline, dot)?;
                    if value.truthy() {
                        self.walk(body, &Dot::Value(value))?;
                    } else {
                        self.walk(otherwise, dot)?;
                    }
                    self.variables.truncate(mark);
                }
                Node::Range {
                    pipeline,
                    body,
                    otherwise,
                } => self.range(pipeline, body, otherwise, dot)?,
            }
        }
        Ok(())
    }

    fn range(
        &mut self,
        pipeline: &Pipeline,
        body: &[Node<'_>],
        otherwise: &[Node<'_>],
        dot: &Dot,
    ) -> Result<(), TemplateError> {
        let entries = match self.commands(pipeline, dot)? {
            Value::Map(map) => map,
            Value::Nil => BTreeMap::new(),
            other => return Err(TemplateError::NotIterable(format!("{other:?}"))),
        };
        if entries.is_empty() {
            return self.walk(otherwise, dot);
        }

        let mark = self.variables.len();
        for (key, element) in entries {
            let element = Value::Str(element);
            match pipeline.declare.as_slice() {
                [] => {}
                [value] => self.variables.push((value.clone(), element.clone())),
                [key_name, value] => {
                    self.variables.push((key_name.clone(), Value::Str(key)));
                    self.variables.push((value.clone(), element.clone()));
                }
                _ => return Err(TemplateError::Malformed(pipeline.source.clone())),
            }
            self.walk(body, &Dot::Value(element))?;
            self.variables.truncate(mark);
        }
        Ok(())
    }

    fn pipeline(&mut self, pipeline: &Pipeline, dot: &Dot) -> Result<Value, TemplateError> {
        let value = self.commands(pipeline, dot)?;
        match pipeline.declare.as_slice() {
            [] => {}
            [name] => self.variables.push((name.clone(), value.clone())),
            _ => return Err(TemplateError::Malformed(pipeline.source.clone())),
        }
        Ok(value)
    }

    /// Each command receives the previous result as its last argument.
    fn commands(&self, pipeline: &Pipeline, dot: &Dot) -> Result<Value, TemplateError> {
        let mut previous = None;
        for command in &pipeline.commands {
            let mut args = command
                .args
                .iter()
                .map(|arg| self.operand(arg, dot))
                .collect::<Result<Vec<_>, _>>()?;
            args.extend(previous.take());

            previous = Some(match command.function {
                Some(function) => function.call(args)?,
                None => match <[Value; 1]>::try_from(args) {
                    Ok([value]) => value,
                    Err(_) => return Err(TemplateError::Malformed(pipeline.source.clone())),
                },
            });
        }
        Ok(previous.unwrap_or(Value::Nil))
    }

    fn operand(&self, operand: &Operand, dot: &Dot) -> Result<Value, TemplateError> {
        Ok(match operand {
            Operand::Field(path) => self.lookup(dot, path),
            Operand::Variable(name, path) if name == "$" => self.lookup(&Dot::Page, path),
            Operand::Variable(name, path) => {
                let value = self
                    .variables
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| TemplateError::UndefinedVariable(name.clone()))?;
                path.iter().fold(value, |value, name| value.field(name))
            }
            Operand::Literal(value) => value.clone(),
            Operand::Nested(inner) => self.commands(inner, dot)?,
        })
    }

    fn lookup(&self, dot: &Dot, path: &[String]) -> Value {
        match dot {
            Dot::Page if path.is_empty() => Value::Nil,
            Dot::Page => {
                let path: Vec<&str> = path.iter().map(String::as_str).collect();
                self.context.field(&path).unwrap_or(Value::Nil)
            }
            Dot::Value(value) => path
                .iter()
                .fold(value.clone(), |value, name| value.field(name)),
        }
    }
}
