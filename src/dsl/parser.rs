//! DSL Parser - step list → node tree
//!
//! A step's shape determines its node type:
//!
//! | Key | Node |
//! |-----|------|
//! | `task` | TASK (`tools`, `parameters`, `retry_count`, `timeout`) |
//! | `sequence` | SEQUENCE of nested steps |
//! | `parallel` | PARALLEL (`max_concurrency`, `fail_fast`, `wait_for_all`) |
//! | `if` / `then` / `else` | CONDITION with branch-tagged children |
//! | `loop` | LOOP (`condition`, `body`, `max_iterations`, `break_on_error`) |
//! | `wait` | WAIT (`condition`, `timeout`, `poll_interval`) |
//!
//! Node ids are deterministic: an explicit `id:` wins, tasks default to their
//! task name, blocks to `<kind>_<n>`. Collisions get a numeric suffix.
//!
//! Unknown task or tool names are NOT rejected here; that is the validator's job.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::OrcaError;

use super::catalog::Catalog;
use super::node::{
    Branch, ConditionConfig, DslNode, LoopConfig, NodeId, NodeKind, NodeMetadata, ParallelConfig,
    TaskConfig, WaitConfig,
};

static NODE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid regex"));

const STEP_KEYWORDS: [&str; 6] = ["task", "sequence", "parallel", "if", "loop", "wait"];

/// Outcome of a parse: either a full tree or the list of errors, never both
#[derive(Debug)]
pub struct ParseResult {
    pub success: bool,
    pub root: Option<DslNode>,
    pub errors: Vec<OrcaError>,
}

impl ParseResult {
    fn ok(root: DslNode) -> Self {
        Self {
            success: true,
            root: Some(root),
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<OrcaError>) -> Self {
        Self {
            success: false,
            root: None,
            errors,
        }
    }

    /// Collapse into a single Result (all errors joined)
    pub fn into_result(self) -> Result<DslNode, OrcaError> {
        match self.root {
            Some(root) if self.success => Ok(root),
            _ => {
                let mut errors = self.errors;
                if errors.len() == 1 {
                    return Err(errors.remove(0));
                }
                Err(OrcaError::ParseError {
                    details: errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; "),
                })
            }
        }
    }
}

/// Converts declarative step lists into validated-shape node trees
#[derive(Debug, Clone, Default)]
pub struct DslParser {
    catalog: Catalog,
}

impl DslParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the known tasks/tools (recorded for the validator)
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Parse an ordered step list
    ///
    /// A single step becomes the root itself; longer lists are wrapped in
    /// a root SEQUENCE.
    pub fn parse(&self, steps: &[Value]) -> ParseResult {
        if steps.is_empty() {
            return ParseResult::failed(vec![OrcaError::ParseError {
                details: "step list is empty".to_string(),
            }]);
        }

        let mut explicit = FxHashSet::default();
        let mut errors = Vec::new();
        for (i, step) in steps.iter().enumerate() {
            collect_explicit_ids(step, &format!("steps[{}]", i), &mut explicit, &mut errors);
        }

        let mut builder = TreeBuilder {
            used: explicit,
            counters: FxHashMap::default(),
            errors,
        };

        let root = if steps.len() == 1 {
            builder.build_step(&steps[0], "steps[0]")
        } else {
            let id = builder.allocate_block_id("sequence");
            let children = builder.build_list(steps, "steps");
            children.map(|c| DslNode::sequence(id, c))
        };

        match root {
            Some(root) if builder.errors.is_empty() => {
                debug!(root = %root.id, nodes = root.node_count(), "parsed workflow");
                ParseResult::ok(root)
            }
            _ => ParseResult::failed(builder.errors),
        }
    }

    /// Parse any JSON shape: a step list, `{steps: [...]}`, or one step
    pub fn parse_value(&self, value: &Value) -> ParseResult {
        match value {
            Value::Array(steps) => self.parse(steps),
            Value::Object(obj) => match obj.get("steps") {
                Some(Value::Array(steps)) => self.parse(steps),
                _ => self.parse(std::slice::from_ref(value)),
            },
            _ => ParseResult::failed(vec![OrcaError::ParseError {
                details: "expected a step list".to_string(),
            }]),
        }
    }

    /// Parse a YAML document holding a step list
    pub fn parse_yaml(&self, yaml: &str) -> ParseResult {
        match serde_yaml::from_str::<Value>(yaml) {
            Ok(value) => self.parse_value(&value),
            Err(e) => ParseResult::failed(vec![OrcaError::ParseError {
                details: e.to_string(),
            }]),
        }
    }
}

/// Validate a node id (`^[A-Za-z_][A-Za-z0-9_-]*$`)
pub fn validate_node_id(id: &str) -> Result<(), OrcaError> {
    if NODE_ID_RE.is_match(id) {
        Ok(())
    } else {
        Err(OrcaError::InvalidNodeId {
            id: id.to_string(),
            reason: "must start with a letter or '_' and contain only [A-Za-z0-9_-]".to_string(),
        })
    }
}

/// Turn a task name into a node id base ("web.search" → "web_search")
fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !out.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        out.insert_str(0, "task_");
    }
    out
}

/// First pass: reserve explicit ids so generated ones never collide with them
fn collect_explicit_ids(
    step: &Value,
    path: &str,
    ids: &mut FxHashSet<String>,
    errors: &mut Vec<OrcaError>,
) {
    let Some(obj) = step.as_object() else {
        return;
    };

    if let Some(id) = obj.get("id").and_then(Value::as_str) {
        if !ids.insert(id.to_string()) {
            errors.push(OrcaError::DuplicateNodeId { id: id.to_string() });
        }
    }

    let mut nested = |key: &str, value: &Value| match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_explicit_ids(item, &format!("{}.{}[{}]", path, key, i), ids, errors);
            }
        }
        Value::Object(_) => collect_explicit_ids(value, &format!("{}.{}", path, key), ids, errors),
        _ => {}
    };

    for key in ["sequence", "parallel", "then", "else", "body"] {
        if let Some(v) = obj.get(key) {
            nested(key, v);
        }
    }
    for key in ["loop", "wait"] {
        if let Some(body) = obj.get(key).and_then(|v| v.get("body")) {
            nested(key, body);
        }
    }
}

struct TreeBuilder {
    used: FxHashSet<String>,
    counters: FxHashMap<&'static str, usize>,
    errors: Vec<OrcaError>,
}

impl TreeBuilder {
    fn error(&mut self, path: &str, reason: impl Into<String>) {
        self.errors.push(OrcaError::InvalidStep {
            path: path.to_string(),
            reason: reason.into(),
        });
    }

    /// `<kind>_<n>`, skipping ids already taken
    fn allocate_block_id(&mut self, kind: &'static str) -> NodeId {
        loop {
            let n = self.counters.entry(kind).or_insert(0);
            *n += 1;
            let candidate = format!("{}_{}", kind, n);
            if self.used.insert(candidate.clone()) {
                return Arc::from(candidate);
            }
        }
    }

    /// Task name, then `<name>_2`, `<name>_3`, ...
    fn allocate_task_id(&mut self, task: &str) -> NodeId {
        let base = sanitize(task);
        if self.used.insert(base.clone()) {
            return Arc::from(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.clone()) {
                return Arc::from(candidate);
            }
            n += 1;
        }
    }

    fn build_list(&mut self, steps: &[Value], path: &str) -> Option<Vec<DslNode>> {
        let mut children = Vec::with_capacity(steps.len());
        let mut ok = true;
        for (i, step) in steps.iter().enumerate() {
            match self.build_step(step, &format!("{}[{}]", path, i)) {
                Some(node) => children.push(node),
                None => ok = false,
            }
        }
        ok.then_some(children)
    }

    fn build_step(&mut self, step: &Value, path: &str) -> Option<DslNode> {
        let Some(obj) = step.as_object() else {
            self.error(path, "step must be a mapping");
            return None;
        };

        let keywords: Vec<&str> = STEP_KEYWORDS
            .iter()
            .copied()
            .filter(|k| obj.contains_key(*k))
            .collect();
        let keyword = match keywords.as_slice() {
            [one] => *one,
            [] => {
                self.error(
                    path,
                    format!("expected one of: {}", STEP_KEYWORDS.join(", ")),
                );
                return None;
            }
            many => {
                self.error(path, format!("ambiguous step: {}", many.join(" + ")));
                return None;
            }
        };

        let explicit_id = match obj.get("id") {
            None => None,
            Some(Value::String(id)) => match validate_node_id(id) {
                Ok(()) => Some(Arc::from(id.as_str())),
                Err(e) => {
                    self.errors.push(e);
                    return None;
                }
            },
            Some(_) => {
                self.error(path, "id must be a string");
                return None;
            }
        };

        let metadata = match obj.get("metadata") {
            None => NodeMetadata::default(),
            Some(Value::Object(tags)) => NodeMetadata {
                branch: None,
                tags: tags.clone(),
            },
            Some(_) => {
                self.error(path, "metadata must be a mapping");
                return None;
            }
        };

        let node = match keyword {
            "task" => self.build_task(obj, explicit_id, path),
            "sequence" => self.build_sequence(obj, explicit_id, path),
            "parallel" => self.build_parallel(obj, explicit_id, path),
            "if" => self.build_condition(obj, explicit_id, path),
            "loop" => self.build_loop(obj, explicit_id, path),
            _ => self.build_wait(obj, explicit_id, path),
        }?;

        Some(DslNode { metadata, ..node })
    }

    fn build_task(
        &mut self,
        obj: &Map<String, Value>,
        id: Option<NodeId>,
        path: &str,
    ) -> Option<DslNode> {
        let Some(task) = obj.get("task").and_then(Value::as_str) else {
            self.error(path, "task must be a string");
            return None;
        };

        let tools = match obj.get("tools") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(tool)) => vec![tool.clone()],
            Some(Value::Array(items)) => {
                let names: Option<Vec<String>> = items
                    .iter()
                    .map(|t| t.as_str().map(str::to_string))
                    .collect();
                match names {
                    Some(names) => names,
                    None => {
                        self.error(path, "tools must be a list of strings");
                        return None;
                    }
                }
            }
            Some(_) => {
                self.error(path, "tools must be a list of strings");
                return None;
            }
        };

        let parameters = match obj.get("parameters") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(p)) => p.clone(),
            Some(_) => {
                self.error(path, "parameters must be a mapping");
                return None;
            }
        };

        let retry_count = match obj.get("retry_count") {
            None => 0,
            Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(n) => n,
                None => {
                    self.error(path, "retry_count must be a non-negative integer");
                    return None;
                }
            },
        };

        let timeout = self.duration(obj, "timeout", path)?;
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        let id = id.unwrap_or_else(|| self.allocate_task_id(task));
        Some(DslNode::new(
            id,
            NodeKind::Task(TaskConfig {
                task: task.to_string(),
                tools,
                parameters,
                retry_count,
                timeout,
                description,
            }),
        ))
    }

    fn build_sequence(
        &mut self,
        obj: &Map<String, Value>,
        id: Option<NodeId>,
        path: &str,
    ) -> Option<DslNode> {
        let id = id.unwrap_or_else(|| self.allocate_block_id("sequence"));
        let children = self.nested_steps(obj.get("sequence"), &format!("{}.sequence", path))?;
        Some(DslNode::sequence(id, children))
    }

    fn build_parallel(
        &mut self,
        obj: &Map<String, Value>,
        id: Option<NodeId>,
        path: &str,
    ) -> Option<DslNode> {
        let id = id.unwrap_or_else(|| self.allocate_block_id("parallel"));

        let defaults = ParallelConfig::default();
        let max_concurrency = match obj.get("max_concurrency") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_u64() {
                Some(n) => Some(n as usize),
                None => {
                    self.error(path, "max_concurrency must be a non-negative integer");
                    return None;
                }
            },
        };
        let fail_fast = self.flag(obj, "fail_fast", defaults.fail_fast, path)?;
        let wait_for_all = self.flag(obj, "wait_for_all", defaults.wait_for_all, path)?;

        let children = self.nested_steps(obj.get("parallel"), &format!("{}.parallel", path))?;
        Some(DslNode::parallel(
            id,
            ParallelConfig {
                max_concurrency,
                fail_fast,
                wait_for_all,
            },
            children,
        ))
    }

    fn build_condition(
        &mut self,
        obj: &Map<String, Value>,
        id: Option<NodeId>,
        path: &str,
    ) -> Option<DslNode> {
        let condition = match obj.get("if").and_then(Value::as_str) {
            Some(c) if !c.trim().is_empty() => c.to_string(),
            _ => {
                self.error(path, "if must be a non-empty condition string");
                return None;
            }
        };
        let id = id.unwrap_or_else(|| self.allocate_block_id("condition"));

        let Some(then_steps) = obj.get("then") else {
            self.error(path, "condition requires a then branch");
            return None;
        };
        let then_node = self.branch(then_steps, &format!("{}.then", path))?;
        let else_node = match obj.get("else") {
            None | Some(Value::Null) => None,
            Some(steps) => Some(self.branch(steps, &format!("{}.else", path))?),
        };

        let mut children = vec![then_node.with_branch(Branch::Then)];
        if let Some(e) = else_node {
            children.push(e.with_branch(Branch::Else));
        }
        Some(DslNode::new(id, NodeKind::Condition(ConditionConfig { condition })).with_children(children))
    }

    /// A branch is one step, or several wrapped in a SEQUENCE
    fn branch(&mut self, steps: &Value, path: &str) -> Option<DslNode> {
        match steps {
            Value::Array(items) if items.len() == 1 => self.build_step(&items[0], &format!("{}[0]", path)),
            Value::Array(items) if items.is_empty() => {
                self.error(path, "branch is empty");
                None
            }
            Value::Array(items) => {
                let id = self.allocate_block_id("sequence");
                let children = self.build_list(items, path)?;
                Some(DslNode::sequence(id, children))
            }
            Value::Object(_) => self.build_step(steps, path),
            _ => {
                self.error(path, "branch must be a step or a list of steps");
                None
            }
        }
    }

    fn build_loop(
        &mut self,
        obj: &Map<String, Value>,
        id: Option<NodeId>,
        path: &str,
    ) -> Option<DslNode> {
        // Nested `loop: {condition, body}` or flat `loop: <cond>, body: [...]`
        let block = match obj.get("loop") {
            Some(Value::Object(inner)) => inner,
            Some(Value::String(_)) => obj,
            _ => {
                self.error(path, "loop must be a condition string or a mapping");
                return None;
            }
        };
        let condition = match block.get("condition").or_else(|| obj.get("loop")) {
            Some(Value::String(c)) if !c.trim().is_empty() => c.clone(),
            _ => {
                self.error(path, "loop requires a condition");
                return None;
            }
        };
        let id = id.unwrap_or_else(|| self.allocate_block_id("loop"));

        let max_iterations = match block.get("max_iterations") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_u64() {
                Some(n) => Some(n as usize),
                None => {
                    self.error(path, "max_iterations must be a non-negative integer");
                    return None;
                }
            },
        };
        let break_on_error = self.flag(block, "break_on_error", true, path)?;

        let Some(body) = block.get("body") else {
            self.error(path, "loop requires a body");
            return None;
        };
        let children = self.nested_steps(Some(body), &format!("{}.body", path))?;

        Some(DslNode::looping(
            id,
            LoopConfig {
                condition,
                max_iterations,
                break_on_error,
            },
            children,
        ))
    }

    fn build_wait(
        &mut self,
        obj: &Map<String, Value>,
        id: Option<NodeId>,
        path: &str,
    ) -> Option<DslNode> {
        let block = match obj.get("wait") {
            Some(Value::Object(inner)) => inner,
            Some(Value::String(_)) => obj,
            _ => {
                self.error(path, "wait must be a condition string or a mapping");
                return None;
            }
        };
        let condition = match block.get("condition").or_else(|| obj.get("wait")) {
            Some(Value::String(c)) if !c.trim().is_empty() => c.clone(),
            _ => {
                self.error(path, "wait requires a condition");
                return None;
            }
        };
        let id = id.unwrap_or_else(|| self.allocate_block_id("wait"));
        let timeout = self.duration(block, "timeout", path)?;
        let poll_interval = self.duration(block, "poll_interval", path)?;

        Some(DslNode::wait(
            id,
            WaitConfig {
                condition,
                timeout,
                poll_interval,
            },
        ))
    }

    fn nested_steps(&mut self, value: Option<&Value>, path: &str) -> Option<Vec<DslNode>> {
        match value {
            Some(Value::Array(items)) => self.build_list(items, path),
            Some(step @ Value::Object(_)) => self.build_step(step, &format!("{}[0]", path)).map(|n| vec![n]),
            _ => {
                self.error(path, "expected a list of steps");
                None
            }
        }
    }

    /// Optional boolean. Outer Option is the error channel.
    fn flag(&mut self, obj: &Map<String, Value>, key: &str, default: bool, path: &str) -> Option<bool> {
        match obj.get(key) {
            None | Some(Value::Null) => Some(default),
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => {
                self.error(path, format!("{} must be a boolean", key));
                None
            }
        }
    }

    /// Optional duration in seconds. Outer Option is the error channel.
    fn duration(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Option<Option<Duration>> {
        match obj.get(key) {
            None | Some(Value::Null) => Some(None),
            Some(v) => match v.as_f64().map(Duration::try_from_secs_f64) {
                Some(Ok(duration)) => Some(Some(duration)),
                Some(Err(e)) => {
                    self.error(path, format!("{} is not a valid duration: {}", key, e));
                    None
                }
                None => {
                    self.error(path, format!("{} must be a non-negative number of seconds", key));
                    None
                }
            },
        }
    }
}
