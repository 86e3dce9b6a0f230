//! DSL Validator - static checks and execution planning
//!
//! Validates:
//! - per-node rules (task/tool names, fan-out, branches, loop bounds, expressions)
//! - tree rules (depth, unique ids, `${result.<id>}` references)
//!
//! Produces the execution plan used by dry runs: stages, predecessor graph
//! and an estimated duration. Pure: no I/O, no task execution.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::expr::{ConditionEvaluator, VariableResolver};
use crate::limits::{ResourceLimits, DEFAULT_LOOP_ITERATIONS, DEFAULT_WAIT_TIMEOUT};

use super::catalog::Catalog;
use super::node::{Branch, DslNode, NodeKind};

/// ERROR blocks execution; WARNING and INFO do not
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: Severity, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            severity,
            message: message.into(),
            node_id: node_id.map(str::to_string),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "{} [{}]: {}", self.severity, id, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Validation report plus execution plan
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    /// Stages of node ids; ids within a stage may run together
    pub execution_order: Vec<Vec<String>>,
    /// node id → predecessors that must finish first
    pub dependency_graph: BTreeMap<String, Vec<String>>,
    /// Seconds when serialized
    #[serde(serialize_with = "as_secs")]
    pub estimated_duration: Duration,
}

impl ValidationResult {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }
}

/// Checks node trees against resource limits and the catalog
#[derive(Debug, Clone, Default)]
pub struct DslValidator {
    limits: ResourceLimits,
    catalog: Catalog,
}

impl DslValidator {
    pub fn new(limits: ResourceLimits, catalog: Catalog) -> Self {
        Self { limits, catalog }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn validate(&self, root: &DslNode) -> ValidationResult {
        let mut issues = Vec::new();

        let depth = root.depth();
        if depth > self.limits.max_workflow_depth {
            issues.push(
                ValidationIssue::new(
                    Severity::Error,
                    format!(
                        "workflow depth {} exceeds maximum {}",
                        depth, self.limits.max_workflow_depth
                    ),
                    Some(&*root.id),
                )
                .with_suggestion("Flatten nested blocks"),
            );
        }

        let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
        for node in root.iter() {
            *counts.entry(&*node.id).or_insert(0) += 1;
        }
        let known_ids: FxHashSet<&str> = counts.keys().copied().collect();
        let mut duplicates: Vec<&str> = counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(id, _)| *id)
            .collect();
        duplicates.sort_unstable();
        for id in duplicates {
            issues.push(ValidationIssue::new(
                Severity::Error,
                format!("duplicate node id '{}'", id),
                Some(id),
            ));
        }

        for node in root.iter() {
            self.check_node(node, &known_ids, &mut issues);
        }

        let execution_order = stages(root);
        let mut dependency_graph = BTreeMap::new();
        predecessors(root, None, &known_ids, &mut dependency_graph);
        let estimated_duration = self.estimate(root);

        let is_valid = !issues.iter().any(ValidationIssue::is_error);
        debug!(
            root = %root.id,
            is_valid,
            issues = issues.len(),
            stages = execution_order.len(),
            "validated workflow"
        );

        ValidationResult {
            is_valid,
            issues,
            execution_order,
            dependency_graph,
            estimated_duration,
        }
    }

    fn check_node(&self, node: &DslNode, known_ids: &FxHashSet<&str>, issues: &mut Vec<ValidationIssue>) {
        let id = Some(&*node.id);
        let mut push = |severity, message: String| {
            issues.push(ValidationIssue::new(severity, message, id));
        };

        match &node.kind {
            NodeKind::Task(cfg) => {
                if !node.children.is_empty() {
                    push(Severity::Error, "task nodes cannot have children".to_string());
                }
                if cfg.retry_count > self.limits.max_task_retries {
                    push(
                        Severity::Warning,
                        format!(
                            "retry_count {} exceeds recommended maximum {}",
                            cfg.retry_count, self.limits.max_task_retries
                        ),
                    );
                }
                self.check_names(node, issues);
                check_references(node, known_ids, issues);
            }
            NodeKind::Sequence => {
                if node.children.is_empty() {
                    push(Severity::Warning, "sequence has no steps".to_string());
                }
            }
            NodeKind::Parallel(cfg) => {
                let n = node.children.len();
                if n > self.limits.max_parallel_tasks {
                    push(
                        Severity::Error,
                        format!(
                            "parallel block has {} children, maximum is {}",
                            n, self.limits.max_parallel_tasks
                        ),
                    );
                }
                if cfg.max_concurrency == Some(0) {
                    push(Severity::Error, "max_concurrency must be at least 1".to_string());
                }
                let mut seen = FxHashSet::default();
                for child in &node.children {
                    if !seen.insert(&*child.id) {
                        push(
                            Severity::Error,
                            format!("duplicate child id '{}' in parallel block", child.id),
                        );
                    }
                }
                match n {
                    0 => push(Severity::Warning, "parallel block has no children".to_string()),
                    1 => push(
                        Severity::Info,
                        "parallel block with a single child runs sequentially".to_string(),
                    ),
                    _ => {}
                }
            }
            NodeKind::Condition(cfg) => {
                let count = |b: Branch| node.children.iter().filter(|c| c.branch() == Some(b)).count();
                let then_count = count(Branch::Then);
                let else_count = count(Branch::Else);
                let untagged = node.children.iter().filter(|c| c.branch().is_none()).count();
                if then_count != 1 {
                    push(
                        Severity::Error,
                        format!("condition needs exactly one then branch, found {}", then_count),
                    );
                }
                if else_count > 1 {
                    push(
                        Severity::Error,
                        format!("condition allows at most one else branch, found {}", else_count),
                    );
                }
                if untagged > 0 {
                    push(
                        Severity::Error,
                        format!("condition has {} child(ren) without a branch tag", untagged),
                    );
                }
                check_expression(&cfg.condition, node, issues);
            }
            NodeKind::Loop(cfg) => {
                match cfg.max_iterations {
                    None => push(
                        Severity::Warning,
                        format!(
                            "loop has no max_iterations; capped at {} at runtime",
                            DEFAULT_LOOP_ITERATIONS
                        ),
                    ),
                    Some(n) if n > self.limits.max_loop_iterations => push(
                        Severity::Error,
                        format!(
                            "max_iterations {} exceeds maximum {}",
                            n, self.limits.max_loop_iterations
                        ),
                    ),
                    Some(_) => {}
                }
                if node.children.is_empty() {
                    push(Severity::Warning, "loop body is empty".to_string());
                }
                check_expression(&cfg.condition, node, issues);
            }
            NodeKind::Wait(cfg) => {
                if !node.children.is_empty() {
                    push(Severity::Error, "wait nodes cannot have children".to_string());
                }
                if cfg.poll_interval == Some(Duration::ZERO) {
                    push(Severity::Error, "poll_interval must be greater than zero".to_string());
                }
                check_expression(&cfg.condition, node, issues);
            }
        }
    }

    /// Task and tool names against the catalog (skipped when unrestricted)
    fn check_names(&self, node: &DslNode, issues: &mut Vec<ValidationIssue>) {
        let NodeKind::Task(cfg) = &node.kind else {
            return;
        };
        let id = Some(&*node.id);

        if cfg.task.trim().is_empty() {
            issues.push(ValidationIssue::new(Severity::Error, "task name is empty", id));
        } else if !self.catalog.has_task(&cfg.task) {
            let mut issue =
                ValidationIssue::new(Severity::Error, format!("unknown task '{}'", cfg.task), id);
            if let Some(close) = self.catalog.suggest_task(&cfg.task) {
                issue = issue.with_suggestion(format!("did you mean '{}'?", close));
            }
            issues.push(issue);
        }

        for tool in &cfg.tools {
            if !self.catalog.has_tool(tool) {
                let mut issue =
                    ValidationIssue::new(Severity::Error, format!("unknown tool '{}'", tool), id);
                issue = match self.catalog.suggest_tool(tool) {
                    Some(close) => issue.with_suggestion(format!("did you mean '{}'?", close)),
                    None => issue.with_suggestion(format!(
                        "available tools: {}",
                        self.catalog.tool_names().join(", ")
                    )),
                };
                issues.push(issue);
            }
        }
    }

    fn estimate(&self, node: &DslNode) -> Duration {
        match &node.kind {
            NodeKind::Task(cfg) => cfg.timeout.unwrap_or(self.limits.default_task_estimate),
            NodeKind::Sequence => node
                .children
                .iter()
                .map(|c| self.estimate(c))
                .fold(Duration::ZERO, Duration::saturating_add),
            NodeKind::Parallel(_) | NodeKind::Condition(_) => node
                .children
                .iter()
                .map(|c| self.estimate(c))
                .max()
                .unwrap_or_default(),
            NodeKind::Loop(cfg) => {
                let body = node
                    .children
                    .iter()
                    .map(|c| self.estimate(c))
                    .fold(Duration::ZERO, Duration::saturating_add);
                let iterations = cfg.max_iterations.unwrap_or(DEFAULT_LOOP_ITERATIONS);
                body.saturating_mul(u32::try_from(iterations).unwrap_or(u32::MAX))
            }
            NodeKind::Wait(cfg) => cfg.timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT),
        }
    }
}

fn check_expression(expression: &str, node: &DslNode, issues: &mut Vec<ValidationIssue>) {
    if let Err(e) = ConditionEvaluator::check_syntax(expression) {
        issues.push(
            ValidationIssue::new(
                Severity::Error,
                format!("invalid expression: {}", e),
                Some(&*node.id),
            )
            .with_suggestion("Use comparisons like result.task.score > 0.5 joined by and/or"),
        );
    }
}

/// `${result.<id>}` references: self → cycle, unknown → warning
fn check_references(node: &DslNode, known_ids: &FxHashSet<&str>, issues: &mut Vec<ValidationIssue>) {
    let NodeKind::Task(cfg) = &node.kind else {
        return;
    };
    let params = Value::Object(cfg.parameters.clone());
    for reference in VariableResolver::references(&params) {
        if reference == *node.id {
            issues.push(ValidationIssue::new(
                Severity::Error,
                format!("cyclic dependency: parameters reference the node's own result '{}'", reference),
                Some(&*node.id),
            ));
        } else if !known_ids.contains(reference.as_str()) {
            issues.push(ValidationIssue::new(
                Severity::Warning,
                format!("parameters reference unknown node '{}'", reference),
                Some(&*node.id),
            ));
        }
    }
}

/// Zip-merge stage lists: stage i of the result is the union of every input's stage i
fn zip_merge(lists: Vec<Vec<Vec<String>>>) -> Vec<Vec<String>> {
    let len = lists.iter().map(Vec::len).max().unwrap_or(0);
    let mut merged = vec![Vec::new(); len];
    for list in lists {
        for (i, stage) in list.into_iter().enumerate() {
            merged[i].extend(stage);
        }
    }
    merged
}

fn stages(node: &DslNode) -> Vec<Vec<String>> {
    match &node.kind {
        NodeKind::Task(_) | NodeKind::Wait(_) => vec![vec![node.id.to_string()]],
        NodeKind::Sequence | NodeKind::Loop(_) => node.children.iter().flat_map(stages).collect(),
        NodeKind::Parallel(_) => zip_merge(node.children.iter().map(stages).collect()),
        NodeKind::Condition(_) => {
            let mut out = vec![vec![node.id.to_string()]];
            out.extend(zip_merge(node.children.iter().map(stages).collect()));
            out
        }
    }
}

fn predecessors(
    node: &DslNode,
    parent: Option<&str>,
    known_ids: &FxHashSet<&str>,
    graph: &mut BTreeMap<String, Vec<String>>,
) {
    let mut deps: Vec<String> = parent.map(str::to_string).into_iter().collect();
    if let NodeKind::Task(cfg) = &node.kind {
        let params = Value::Object(cfg.parameters.clone());
        for reference in VariableResolver::references(&params) {
            if reference != *node.id && known_ids.contains(reference.as_str()) && !deps.contains(&reference) {
                deps.push(reference);
            }
        }
    }
    graph.insert(node.id.to_string(), deps);

    let ordered = matches!(node.kind, NodeKind::Sequence | NodeKind::Loop(_));
    let mut previous: Option<&str> = None;
    for child in &node.children {
        // in a sequence each child waits for its previous sibling
        let pred = match previous {
            Some(prev) if ordered => prev,
            _ => &*node.id,
        };
        predecessors(child, Some(pred), known_ids, graph);
        previous = Some(&*child.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::node::{LoopConfig, ParallelConfig, TaskConfig, WaitConfig};
    use crate::dsl::parser::DslParser;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn validator() -> DslValidator {
        DslValidator::new(ResourceLimits::testing(), Catalog::unrestricted())
    }

    fn parse(steps: Value) -> DslNode {
        DslParser::new()
            .parse(steps.as_array().unwrap())
            .into_result()
            .unwrap()
    }

    fn messages(result: &ValidationResult, severity: Severity) -> Vec<String> {
        result
            .issues
            .iter()
            .filter(|i| i.severity == severity)
            .map(|i| i.message.clone())
            .collect()
    }

    #[test]
    fn valid_workflow_has_plan() {
        let root = parse(json!([
            {"task": "search"},
            {"parallel": [{"task": "summarize"}, {"task": "translate"}]},
            {"task": "report"}
        ]));
        let result = validator().validate(&root);
        assert!(result.is_valid, "{:?}", result.issues);
        assert_eq!(
            result.execution_order,
            vec![
                vec!["search".to_string()],
                vec!["summarize".to_string(), "translate".to_string()],
                vec!["report".to_string()],
            ]
        );
        assert_eq!(result.dependency_graph["search"], vec!["sequence_1"]);
        assert_eq!(result.dependency_graph["parallel_1"], vec!["search"]);
        assert_eq!(result.dependency_graph["translate"], vec!["parallel_1"]);
        assert_eq!(result.dependency_graph["report"], vec!["parallel_1"]);
        assert!(result.dependency_graph["sequence_1"].is_empty());
        // 1s + max(1s, 1s) + 1s with testing limits
        assert_eq!(result.estimated_duration, Duration::from_secs(3));
    }

    #[test]
    fn unknown_tool_is_an_error_with_suggestion() {
        let catalog = Catalog::unrestricted().with_tools(["web_search"]);
        let v = DslValidator::new(ResourceLimits::default(), catalog);
        let root = parse(json!([{"task": "t", "tools": ["web_serch"]}]));
        let result = v.validate(&root);
        assert!(!result.is_valid);
        let issue = result.errors().next().unwrap();
        assert!(issue.message.contains("unknown tool 'web_serch'"));
        assert_eq!(issue.suggestion.as_deref(), Some("did you mean 'web_search'?"));
        assert_eq!(issue.node_id.as_deref(), Some("t"));
    }

    #[test]
    fn unknown_task_only_when_catalog_restricts() {
        let root = parse(json!([{"task": "mystery"}]));
        assert!(validator().validate(&root).is_valid);

        let v = DslValidator::new(
            ResourceLimits::default(),
            Catalog::unrestricted().with_tasks(["search"]),
        );
        assert!(!v.validate(&root).is_valid);
    }

    #[test]
    fn empty_task_name() {
        let root = DslNode::new("t", NodeKind::Task(TaskConfig::new("  ")));
        let result = validator().validate(&root);
        assert_eq!(messages(&result, Severity::Error), vec!["task name is empty"]);
    }

    #[test]
    fn parallel_rules() {
        let wide: Vec<DslNode> = (0..5).map(|i| DslNode::task(format!("t{}", i), "x")).collect();
        let root = DslNode::parallel(
            "p",
            ParallelConfig {
                max_concurrency: Some(0),
                ..Default::default()
            },
            wide,
        );
        let errors = messages(&validator().validate(&root), Severity::Error);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("maximum is 4"));

        let single = DslNode::parallel("p", ParallelConfig::default(), vec![DslNode::task("a", "x")]);
        let result = validator().validate(&single);
        assert!(result.is_valid);
        assert_eq!(messages(&result, Severity::Info).len(), 1);

        let empty = DslNode::parallel("p", ParallelConfig::default(), vec![]);
        assert_eq!(messages(&validator().validate(&empty), Severity::Warning).len(), 1);
    }

    #[test]
    fn duplicate_ids_across_tree() {
        let root = DslNode::sequence(
            "root",
            vec![
                DslNode::task("a", "x"),
                DslNode::parallel("p", ParallelConfig::default(), vec![DslNode::task("a", "y")]),
            ],
        );
        let errors = messages(&validator().validate(&root), Severity::Error);
        assert_eq!(errors, vec!["duplicate node id 'a'"]);
    }

    #[test]
    fn condition_branch_rules() {
        let untagged = DslNode::new(
            "c",
            NodeKind::Condition(crate::dsl::ConditionConfig {
                condition: "x > 1".into(),
            }),
        )
        .with_children(vec![DslNode::task("a", "t")]);
        let errors = messages(&validator().validate(&untagged), Severity::Error);
        assert_eq!(errors.len(), 2);

        let bad_expr = DslNode::condition("c", "x >", DslNode::task("a", "t"), None);
        let result = validator().validate(&bad_expr);
        assert!(messages(&result, Severity::Error)[0].starts_with("invalid expression"));
    }

    #[test]
    fn loop_rules() {
        let unbounded = DslNode::looping(
            "l",
            LoopConfig {
                condition: "counter < 3".into(),
                max_iterations: None,
                break_on_error: true,
            },
            vec![DslNode::task("t", "tick")],
        );
        let result = validator().validate(&unbounded);
        assert!(result.is_valid);
        assert!(messages(&result, Severity::Warning)[0].contains("no max_iterations"));

        let too_many = DslNode::looping(
            "l",
            LoopConfig {
                condition: "true".into(),
                max_iterations: Some(51),
                break_on_error: true,
            },
            vec![],
        );
        let result = validator().validate(&too_many);
        assert!(!result.is_valid);
        assert_eq!(messages(&result, Severity::Warning), vec!["loop body is empty"]);
    }

    #[test]
    fn wait_poll_interval_must_be_positive() {
        let root = DslNode::wait(
            "w",
            WaitConfig {
                condition: "ready".into(),
                timeout: Some(Duration::from_secs(2)),
                poll_interval: Some(Duration::ZERO),
            },
        );
        let result = validator().validate(&root);
        assert!(!result.is_valid);
        assert_eq!(result.estimated_duration, Duration::from_secs(2));
    }

    #[test]
    fn depth_limit() {
        let mut node = DslNode::task("leaf", "x");
        for i in 0..4 {
            node = DslNode::sequence(format!("s{}", i), vec![node]);
        }
        let result = validator().validate(&node);
        assert!(messages(&result, Severity::Error)[0].contains("depth 5 exceeds maximum 4"));
    }

    #[test]
    fn result_references() {
        let root = parse(json!([
            {"task": "fetch"},
            {"task": "analyze", "parameters": {"input": "${result.fetch.body}", "prev": "${result.ghost}"}},
            {"id": "loopy", "task": "x", "parameters": {"me": "${result.loopy}"}}
        ]));
        let result = validator().validate(&root);
        assert_eq!(
            messages(&result, Severity::Error),
            vec!["cyclic dependency: parameters reference the node's own result 'loopy'"]
        );
        assert_eq!(
            messages(&result, Severity::Warning),
            vec!["parameters reference unknown node 'ghost'"]
        );
        assert_eq!(result.dependency_graph["analyze"], vec!["fetch"]);
    }

    #[test]
    fn retry_count_above_limit_warns() {
        let root = parse(json!([{"task": "x", "retry_count": 9}]));
        let result = validator().validate(&root);
        assert!(result.is_valid);
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn condition_stages_and_estimate() {
        let root = parse(json!([{
            "if": "ready",
            "then": [{"task": "a", "timeout": 5}],
            "else": [{"task": "b"}]
        }]));
        let result = validator().validate(&root);
        assert_eq!(
            result.execution_order,
            vec![vec!["condition_1".to_string()], vec!["a".to_string(), "b".to_string()]]
        );
        assert_eq!(result.estimated_duration, Duration::from_secs(5));
    }

    #[test]
    fn report_serializes() {
        let root = parse(json!([{"task": "a"}]));
        let json = serde_json::to_value(validator().validate(&root)).unwrap();
        assert_eq!(json["is_valid"], true);
        assert_eq!(json["estimated_duration"], 1.0);
        assert_eq!(json["execution_order"], json!([["a"]]));
    }

    #[test]
    fn huge_estimates_saturate() {
        let root = parse(json!([
            {"task": "a", "timeout": 1e19},
            {"task": "b", "timeout": 1e19},
            {"loop": "true", "body": [{"task": "c", "timeout": 1e19}, {"task": "d", "timeout": 1e19}], "max_iterations": 3}
        ]));
        let result = validator().validate(&root);
        assert_eq!(result.estimated_duration, Duration::MAX);
    }
}
