//! A small, forgiving template language.
//!
//! `{{ path.to.value | filter | filter("arg") }}` looks a value up in the
//! scope and pipes it through filters. Paths are dotted, with optional
//! `["key"]` or `[0]` subscripts. `%IP%`, `%EPOCH%` and `%REQUESTID%` in
//! literal text are replaced with the masked client address, arrival time
//! and request id.
//!
//! Rendering never fails. Undefined values render as an empty string,
//! unknown filters are ignored, and an unterminated `{{` is kept as text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use url::form_urlencoded;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Reserved substitution tokens recognized in literal template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentToken {
    Ip,
    Epoch,
    RequestId,
}

impl PercentToken {
    const ALL: [(&'static str, PercentToken); 3] = [
        ("%IP%", PercentToken::Ip),
        ("%EPOCH%", PercentToken::Epoch),
        ("%REQUESTID%", PercentToken::RequestId),
    ];

    fn scope_path(self) -> [&'static str; 2] {
        match self {
            PercentToken::Ip => ["request", "safe_ip"],
            PercentToken::Epoch => ["request", "epoch"],
            PercentToken::RequestId => ["request", "id"],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Md5,
    ToJson,
    Upper,
    Lower,
    Trim,
    UrlEncode,
    B64Encode,
    Length,
    Default(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Expr {
    path: Vec<String>,
    filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Token(PercentToken),
    Expr(Expr),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template source. Never fails.
    pub fn parse(source: &str) -> Self {
        let mut nodes = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };
            push_text(&mut nodes, &rest[..start]);
            nodes.push(Node::Expr(parse_expr(&after_open[..end])));
            rest = &after_open[end + CLOSE.len()..];
        }
        push_text(&mut nodes, rest);

        Self { nodes }
    }

    /// True when rendering cannot depend on the scope.
    pub fn is_static(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Text(_)))
    }

    /// Render against a scope value.
    pub fn render(&self, scope: &Value) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Token(token) => {
                    let path = token.scope_path();
                    if let Some(value) = lookup(scope, &path) {
                        out.push_str(&display(value));
                    }
                }
                Node::Expr(expr) => {
                    let value = lookup(scope, &expr.path).cloned();
                    let value = expr
                        .filters
                        .iter()
                        .fold(value, |value, filter| apply_filter(filter, value));
                    if let Some(value) = value {
                        out.push_str(&display(&value));
                    }
                }
            }
        }
        out
    }
}

/// Split literal text into text and percent-token nodes.
fn push_text(nodes: &mut Vec<Node>, mut text: &str) {
    while !text.is_empty() {
        let next = PercentToken::ALL
            .iter()
            .filter_map(|(marker, token)| text.find(marker).map(|pos| (pos, *marker, *token)))
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, marker, token)) => {
                if pos > 0 {
                    nodes.push(Node::Text(text[..pos].to_string()));
                }
                nodes.push(Node::Token(token));
                text = &text[pos + marker.len()..];
            }
            None => {
                nodes.push(Node::Text(text.to_string()));
                return;
            }
        }
    }
}

fn parse_expr(source: &str) -> Expr {
    let mut pieces = split_outside_quotes(source, '|').into_iter();
    let path = parse_path(pieces.next().unwrap_or_default().trim());
    let filters = pieces.filter_map(|p| parse_filter(p.trim())).collect();
    Expr { path, filters }
}

/// Parse `a.b["c"][0]` into `["a", "b", "c", "0"]`.
fn parse_path(source: &str) -> Vec<String> {
    let mut path = Vec::new();
    let mut current = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    path.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    path.push(std::mem::take(&mut current));
                }
                let mut key = String::new();
                for k in chars.by_ref() {
                    if k == ']' {
                        break;
                    }
                    key.push(k);
                }
                path.push(unquote(key.trim()).to_string());
            }
            c if c.is_whitespace() => {}
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        path.push(current);
    }
    path
}

fn parse_filter(source: &str) -> Option<Filter> {
    let (name, arg) = match source.find('(') {
        Some(open) => {
            let arg = source[open + 1..].trim_end().trim_end_matches(')').trim();
            (source[..open].trim(), Some(unquote(arg).to_string()))
        }
        None => (source, None),
    };

    let filter = match name {
        "md5" => Filter::Md5,
        "tojson" => Filter::ToJson,
        "upper" => Filter::Upper,
        "lower" => Filter::Lower,
        "trim" => Filter::Trim,
        "urlencode" => Filter::UrlEncode,
        "b64encode" => Filter::B64Encode,
        "length" | "count" => Filter::Length,
        "default" | "d" => Filter::Default(arg.unwrap_or_default()),
        other => {
            tracing::warn!(filter = %other, "Ignoring unknown template filter");
            return None;
        }
    };
    Some(filter)
}

fn apply_filter(filter: &Filter, value: Option<Value>) -> Option<Value> {
    if let Filter::Default(fallback) = filter {
        return Some(value.unwrap_or_else(|| Value::String(fallback.clone())));
    }
    let value = value?;
    let result = match filter {
        Filter::Md5 => Value::String(format!("{:x}", md5::compute(display(&value)))),
        Filter::ToJson => Value::String(value.to_string()),
        Filter::Upper => Value::String(display(&value).to_uppercase()),
        Filter::Lower => Value::String(display(&value).to_lowercase()),
        Filter::Trim => Value::String(display(&value).trim().to_string()),
        Filter::UrlEncode => {
            Value::String(form_urlencoded::byte_serialize(display(&value).as_bytes()).collect())
        }
        Filter::B64Encode => Value::String(STANDARD.encode(display(&value))),
        Filter::Length => Value::from(match &value {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            other => display(other).chars().count(),
        }),
        Filter::Default(_) => value,
    };
    Some(result)
}

fn lookup<'a, S: AsRef<str>>(scope: &'a Value, path: &[S]) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.iter().try_fold(scope, |value, key| match value {
        Value::Object(map) => map.get(key.as_ref()),
        Value::Array(items) => key.as_ref().parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

fn split_outside_quotes(source: &str, separator: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in source.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, c) if c == separator => {
                pieces.push(&source[start..i]);
                start = i + c.len_utf8();
            }
            (None, _) => {}
        }
    }
    pieces.push(&source[start..]);
    pieces
}
