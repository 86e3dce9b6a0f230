//! Reference paths - `result.node.items[0].name`
//!
//! Supports:
//! - dot notation (`a.b.c`)
//! - array index (`a[0]`, `a.0`)
//! - quoted keys (`a["key with spaces"]`)
//!
//! The first segment picks the root:
//! - `result` / `results` → node results
//! - `context` / `variables` / `vars` → workflow variables
//! - anything else → variable of that name, then node result of that name

use serde_json::{Map, Value};

use crate::error::{OrcaError, Result};

/// A parsed path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Object field access: .field
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

impl Segment {
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Segment::Field(name) => Some(name),
            Segment::Index(_) => None,
        }
    }
}

/// Read access to the values a path can reach
pub trait Scope {
    fn variable(&self, name: &str) -> Option<Value>;
    fn result(&self, node_id: &str) -> Option<Value>;
    /// All variables as one object
    fn variables(&self) -> Value;
    /// All node results as one object
    fn results(&self) -> Value;
}

/// Plain-map scope, handy for tests and static checks
#[derive(Debug, Clone, Default)]
pub struct MapScope {
    pub variables: Map<String, Value>,
    pub results: Map<String, Value>,
}

impl MapScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_result(mut self, node_id: impl Into<String>, value: Value) -> Self {
        self.results.insert(node_id.into(), value);
        self
    }
}

impl Scope for MapScope {
    fn variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name).cloned()
    }

    fn result(&self, node_id: &str) -> Option<Value> {
        self.results.get(node_id).cloned()
    }

    fn variables(&self) -> Value {
        Value::Object(self.variables.clone())
    }

    fn results(&self) -> Value {
        Value::Object(self.results.clone())
    }
}

fn syntax_error(path: &str, position: usize, details: &str) -> OrcaError {
    OrcaError::ExpressionSyntax {
        expression: path.to_string(),
        position,
        details: details.to_string(),
    }
}

/// Parse a path string into segments
///
/// Examples:
/// - "result.a.score" → [Field("result"), Field("a"), Field("score")]
/// - "items[0].name" → [Field("items"), Index(0), Field("name")]
pub fn parse(path: &str) -> Result<Vec<Segment>> {
    let path = path.trim();
    if path.is_empty() {
        return Err(syntax_error(path, 0, "empty path"));
    }

    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    let mut expect_field = true;

    while i < chars.len() {
        match chars[i] {
            '.' if !expect_field => {
                i += 1;
                expect_field = true;
                if i >= chars.len() {
                    return Err(syntax_error(path, i, "trailing '.'"));
                }
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i)
                    .ok_or_else(|| syntax_error(path, i, "unclosed '['"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                let inner = inner.trim();
                let segment = if let Some(key) = unquote(inner) {
                    Segment::Field(key.to_string())
                } else {
                    inner
                        .parse::<usize>()
                        .map(Segment::Index)
                        .map_err(|_| syntax_error(path, i, "index must be an integer or a quoted key"))?
                };
                segments.push(segment);
                i = close + 1;
                expect_field = false;
            }
            c if expect_field && is_ident_char(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let part: String = chars[start..i].iter().collect();
                // "items.0" addresses an array element
                let segment = match part.parse::<usize>() {
                    Ok(idx) if !segments.is_empty() => Segment::Index(idx),
                    _ => Segment::Field(part),
                };
                segments.push(segment);
                expect_field = false;
            }
            _ => return Err(syntax_error(path, i, "unexpected character")),
        }
    }

    Ok(segments)
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn unquote(s: &str) -> Option<&str> {
    let quoted = |q: char| s.len() >= 2 && s.starts_with(q) && s.ends_with(q);
    (quoted('"') || quoted('\'')).then(|| &s[1..s.len() - 1])
}

/// Apply segments to a JSON value
///
/// Uses references internally; the caller clones once at the end.
pub fn apply<'v>(value: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    let mut current = value;
    for segment in segments {
        current = match segment {
            Segment::Field(name) => current.get(name)?,
            Segment::Index(idx) => current.get(*idx)?,
        };
    }
    Some(current)
}

/// Resolve segments against a scope, honoring the root rules
pub fn lookup<S: Scope + ?Sized>(scope: &S, segments: &[Segment]) -> Option<Value> {
    let (root, rest) = segments.split_first()?;
    let root = root.as_field()?;

    match root {
        "result" | "results" => match rest.split_first() {
            None => Some(scope.results()),
            Some((Segment::Field(node_id), tail)) => {
                let value = scope.result(node_id)?;
                apply(&value, tail).cloned()
            }
            Some((Segment::Index(_), _)) => None,
        },
        "context" | "variables" | "vars" => match rest.split_first() {
            None => Some(scope.variables()),
            Some((Segment::Field(name), tail)) => {
                let value = scope.variable(name)?;
                apply(&value, tail).cloned()
            }
            Some((Segment::Index(_), _)) => None,
        },
        name => {
            let value = scope.variable(name).or_else(|| scope.result(name))?;
            apply(&value, rest).cloned()
        }
    }
}

/// Parse and look up in one step
pub fn resolve<S: Scope + ?Sized>(scope: &S, path: &str) -> Result<Option<Value>> {
    let segments = parse(path)?;
    Ok(lookup(scope, &segments))
}

/// Node id a `result.<id>...` path points at, if any
pub fn referenced_node(segments: &[Segment]) -> Option<&str> {
    match segments {
        [Segment::Field(root), Segment::Field(id), ..] if root == "result" || root == "results" => {
            Some(id.as_str())
        }
        _ => None,
    }
}
