//! Value-interpolation dialect (`eta`).
//!
//! A small, sandboxed rendition of the Eta tag syntax used by older card
//! configurations:
//!
//! - `<%= expr %>` and `<%~ expr %>` substitute the value of `expr`;
//! - `<%~ include("name", { key: expr }) %>` renders a partial with an explicit
//!   data object.
//!
//! HTML escaping has no meaning for card configuration, so the two output tags
//! behave the same: both pass through the caller's escaper, which is the identity
//! for partials and JSON-string escaping for template bodies. That keeps an
//! included multi-line partial valid inside the string it lands in.
//!
//! Expressions are deliberately limited: dotted and indexed paths rooted at a data
//! key or at `it` (the whole data object), string/number/boolean/null literals,
//! object and array literals, the `||` and `??` fallbacks, and `include`. Code
//! blocks (`<% ... %>`) are rejected at compile time. Whitespace control works as in
//! Eta: `-` next to a delimiter trims one newline, `_` trims all whitespace.
//!
//! Lookups follow JavaScript's rules closely enough for configuration use: a
//! missing property is `undefined` and prints as an empty string, while reading a
//! property *of* `undefined` or `null`, or naming an unknown root variable, is a
//! runtime error.

use serde_json::{Map, Value};

use super::error::RenderError;

const OPEN_TAG: &str = "<%";
const CLOSE_TAG: &str = "%>";

/// A compiled `eta` template.
#[derive(Debug, Clone, PartialEq)]
pub struct EtaProgram {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Output(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Undefined,
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Call(String, Vec<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Nullish(Box<Expr>, Box<Expr>),
}

/// Callback used to render `include(name, data)`.
pub type IncludeFn<'a> = dyn Fn(&str, &Value) -> Result<String, RenderError> + 'a;

/// Whitespace control written just inside a tag delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trim {
    /// `-`: drop one adjacent newline
    Newline,
    /// `_`: drop all adjacent whitespace
    Whitespace,
}

impl Trim {
    fn from_marker(marker: Option<char>) -> Option<Self> {
        match marker {
            Some('-') => Some(Self::Newline),
            Some('_') => Some(Self::Whitespace),
            _ => None,
        }
    }
}

// Template bodies are compiled from serialized JSON, where a newline is the two
// characters `\n`; both spellings count.
const NEWLINES: &[&str] = &["\r\n", "\n", "\r", "\\r\\n", "\\n", "\\r"];
const WHITESPACE: &[&str] = &[" ", "\t", "\r", "\n", "\\t", "\\r", "\\n"];

/// Strip one of `tokens` from the end of `text`. An escaped token only counts when
/// its backslash is not itself escaped.
fn strip_suffix_token<'a>(text: &'a str, tokens: &[&str]) -> Option<&'a str> {
    tokens.iter().find_map(|token| {
        let rest = text.strip_suffix(*token)?;
        let escaped_backslash =
            token.starts_with('\\') && rest.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1;
        (!escaped_backslash).then_some(rest)
    })
}

fn trim_end(text: &str, trim: Trim) -> &str {
    match trim {
        Trim::Newline => strip_suffix_token(text, NEWLINES).unwrap_or(text),
        Trim::Whitespace => {
            let mut text = text;
            while let Some(rest) = strip_suffix_token(text, WHITESPACE) {
                text = rest;
            }
            text
        }
    }
}

fn trim_start(text: &str, trim: Trim) -> &str {
    let strip = |text: &str, tokens: &[&str]| -> Option<usize> {
        tokens.iter().find(|token| text.starts_with(**token)).map(|token| token.len())
    };
    match trim {
        Trim::Newline => strip(text, NEWLINES).map_or(text, |n| &text[n..]),
        Trim::Whitespace => {
            let mut text = text;
            while let Some(n) = strip(text, WHITESPACE) {
                text = &text[n..];
            }
            text
        }
    }
}

/// Compile `source` into a program.
///
/// Tags accept Eta's whitespace control: `<%-` and `-%>` drop one newline next to
/// the tag, `<%_` and `_%>` drop all adjacent whitespace.
///
/// # Errors
///
/// Returns [`RenderError::SnippetCompileFailure`] for unclosed tags, code blocks, and
/// malformed expressions.
pub fn compile(name: &str, source: &str) -> Result<EtaProgram, RenderError> {
    let compile_error = |message: String| RenderError::SnippetCompileFailure {
        name: name.to_string(),
        message,
    };

    let mut segments = Vec::new();
    let mut rest = source;
    let mut offset = 0;
    let mut trim_next = None;

    while let Some(start) = rest.find(OPEN_TAG) {
        let tag_start = offset + start;
        let after_open = &rest[start + OPEN_TAG.len()..];
        let end = after_open
            .find(CLOSE_TAG)
            .ok_or_else(|| compile_error(format!("unclosed tag at byte {tag_start}")))?;

        let mut inner = &after_open[..end];
        let trim_left = Trim::from_marker(inner.chars().next());
        if trim_left.is_some() {
            inner = &inner[1..];
        }
        let trim_right = Trim::from_marker(inner.trim_end().chars().last());
        if trim_right.is_some() {
            let trimmed = inner.trim_end();
            inner = &trimmed[..trimmed.len() - 1];
        }

        let mut text = &rest[..start];
        if let Some(trim) = trim_next.take() {
            text = trim_start(text, trim);
        }
        if let Some(trim) = trim_left {
            text = trim_end(text, trim);
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }

        let inner = inner.trim_start();
        let segment = match inner.chars().next() {
            Some('=' | '~') => Segment::Output(parse_expression(&inner[1..]).map_err(|e| {
                compile_error(format!("{e} in tag at byte {tag_start}"))
            })?),
            _ => {
                return Err(compile_error(format!(
                    "code blocks are not supported (tag at byte {tag_start}); use <%= %> or <%~ %>, \
                     with optional -/_ whitespace control as in <%-= expr -%>"
                )));
            }
        };
        segments.push(segment);
        trim_next = trim_right;

        let consumed = start + OPEN_TAG.len() + end + CLOSE_TAG.len();
        rest = &rest[consumed..];
        offset += consumed;
    }

    let text = match trim_next {
        Some(trim) => trim_start(rest, trim),
        None => rest,
    };
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }

    Ok(EtaProgram {
        segments,
    })
}

impl EtaProgram {
    /// Render the program against `data`.
    ///
    /// `escape` is applied to every substitution. `include` renders nested
    /// partials.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SnippetRuntimeFailure`] for failed lookups, and any
    /// error produced by `include`.
    pub fn render(
        &self,
        name: &str,
        data: &Value,
        escape: fn(&str) -> String,
        include: &IncludeFn<'_>,
    ) -> Result<String, RenderError> {
        let evaluator = Evaluator {
            name,
            data,
            include,
        };

        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Output(expr) => {
                    output.push_str(&escape(&display(evaluator.eval(expr)?.as_ref())));
                }
            }
        }
        Ok(output)
    }
}

fn display(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

struct Evaluator<'a> {
    name: &'a str,
    data: &'a Value,
    include: &'a IncludeFn<'a>,
}

impl Evaluator<'_> {
    /// Evaluate an expression; `None` is JavaScript's `undefined`.
    fn eval(&self, expr: &Expr) -> Result<Option<Value>, RenderError> {
        match expr {
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Undefined => Ok(None),
            Expr::Ident(ident) => {
                if ident == "it" {
                    return Ok(Some(self.data.clone()));
                }
                match self.data.as_object().and_then(|map| map.get(ident)) {
                    Some(value) => Ok(Some(value.clone())),
                    None => Err(RenderError::runtime(self.name, format!("{ident} is not defined"))),
                }
            }
            Expr::Member(target, property) => {
                let target = self.eval(target)?;
                self.property(target.as_ref(), property)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                match index {
                    Some(Value::String(key)) => self.property(target.as_ref(), &key),
                    Some(Value::Number(n)) => self.property(target.as_ref(), &n.to_string()),
                    other => Err(RenderError::runtime(
                        self.name,
                        format!("invalid index {}", display(other.as_ref())),
                    )),
                }
            }
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (key, value_expr) in entries {
                    // JSON.stringify semantics: undefined members are dropped
                    if let Some(value) = self.eval(value_expr)? {
                        map.insert(key.clone(), value);
                    }
                }
                Ok(Some(Value::Object(map)))
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?.unwrap_or(Value::Null));
                }
                Ok(Some(Value::Array(values)))
            }
            Expr::Call(function, args) => self.call(function, args),
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if truthy(left.as_ref()) { Ok(left) } else { self.eval(right) }
            }
            Expr::Nullish(left, right) => match self.eval(left)? {
                None | Some(Value::Null) => self.eval(right),
                value => Ok(value),
            },
        }
    }

    fn property(&self, target: Option<&Value>, property: &str) -> Result<Option<Value>, RenderError> {
        match target {
            None => Err(RenderError::runtime(
                self.name,
                format!("Cannot read properties of undefined (reading '{property}')"),
            )),
            Some(Value::Null) => Err(RenderError::runtime(
                self.name,
                format!("Cannot read properties of null (reading '{property}')"),
            )),
            Some(Value::Object(map)) => Ok(map.get(property).cloned()),
            Some(Value::Array(items)) => {
                if property == "length" {
                    return Ok(Some(Value::from(items.len())));
                }
                Ok(property.parse::<usize>().ok().and_then(|i| items.get(i)).cloned())
            }
            Some(Value::String(s)) if property == "length" => {
                Ok(Some(Value::from(s.chars().count())))
            }
            Some(_) => Ok(None),
        }
    }

    fn call(&self, function: &str, args: &[Expr]) -> Result<Option<Value>, RenderError> {
        if function != "include" {
            return Err(RenderError::runtime(self.name, format!("{function} is not a function")));
        }

        let partial = match args.first().map(|arg| self.eval(arg)).transpose()?.flatten() {
            Some(Value::String(name)) => name,
            _ => {
                return Err(RenderError::runtime(
                    self.name,
                    "include() expects a partial name as its first argument",
                ));
            }
        };
        let data = match args.get(1).map(|arg| self.eval(arg)).transpose()?.flatten() {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value @ Value::Object(_)) => value,
            Some(_) => {
                return Err(RenderError::runtime(
                    self.name,
                    format!("include('{partial}') expects an object as its data argument"),
                ));
            }
        };

        (self.include)(&partial, &data).map(|rendered| Some(Value::String(rendered)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Punct(&'static str),
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text.parse::<f64>().map_err(|_| format!("invalid number '{text}'"))?;
            tokens.push(Token::Num(number));
            continue;
        }

        if c == '"' || c == '\'' || c == '`' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string literal".to_string()),
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = chars.get(i + 1).ok_or("unterminated string literal")?;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => *other,
                        });
                        i += 2;
                    }
                    Some(&ch) => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(value));
            continue;
        }

        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        if two == "||" || two == "??" {
            tokens.push(Token::Punct(if two == "||" { "||" } else { "??" }));
            i += 2;
            continue;
        }

        let punct = match c {
            '.' => ".",
            '[' => "[",
            ']' => "]",
            '{' => "{",
            '}' => "}",
            '(' => "(",
            ')' => ")",
            ',' => ",",
            ':' => ":",
            other => return Err(format!("unexpected character '{other}'")),
        };
        tokens.push(Token::Punct(punct));
        i += 1;
    }

    Ok(tokens)
}

fn parse_expression(source: &str) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
    };
    let expr = parser.parse_fallback()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected {:?}", parser.tokens[parser.pos]));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), String> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(format!("expected '{punct}'"))
        }
    }

    fn parse_fallback(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_postfix()?;
        loop {
            if self.eat("||") {
                left = Expr::Or(Box::new(left), Box::new(self.parse_postfix()?));
            } else if self.eat("??") {
                left = Expr::Nullish(Box::new(left), Box::new(self.parse_postfix()?));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                match self.next() {
                    Some(Token::Ident(property)) => {
                        expr = Expr::Member(Box::new(expr), property);
                    }
                    _ => return Err("expected property name after '.'".to_string()),
                }
            } else if self.eat("[") {
                let index = self.parse_fallback()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "undefined" => Ok(Expr::Undefined),
                _ if self.eat("(") => {
                    let args = self.parse_list(")")?;
                    Ok(Expr::Call(ident, args))
                }
                _ => Ok(Expr::Ident(ident)),
            },
            Some(Token::Punct("(")) => {
                let expr = self.parse_fallback()?;
                self.expect(")")?;
                Ok(expr)
            }
            Some(Token::Punct("[")) => Ok(Expr::Array(self.parse_list("]")?)),
            Some(Token::Punct("{")) => self.parse_object(),
            Some(token) => Err(format!("unexpected {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_list(&mut self, close: &str) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.parse_fallback()?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn parse_object(&mut self) -> Result<Expr, String> {
        let mut entries = Vec::new();
        while !self.eat("}") {
            let key = match self.next() {
                Some(Token::Ident(key) | Token::Str(key)) => key,
                _ => return Err("expected object key".to_string()),
            };
            let value = if self.eat(":") {
                self.parse_fallback()?
            } else {
                // shorthand `{ name }`
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}
