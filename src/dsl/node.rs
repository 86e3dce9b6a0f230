//! DSL Node Model - the workflow program tree
//!
//! A workflow is a tree of [`DslNode`]s. The node type is a tagged union
//! ([`NodeKind`]) carrying a typed config per variant, so the executor and
//! validator match exhaustively instead of branching on strings.
//!
//! Children are owned exclusively by their parent: no node is shared between
//! parents and the structure cannot contain cycles.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node identifier (Arc<str> for O(1) cloning into maps and events)
pub type NodeId = Arc<str>;

/// The six node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Task,
    Sequence,
    Parallel,
    Condition,
    Loop,
    Wait,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Task => "task",
            NodeType::Sequence => "sequence",
            NodeType::Parallel => "parallel",
            NodeType::Condition => "condition",
            NodeType::Loop => "loop",
            NodeType::Wait => "wait",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which branch of a condition a child belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    Then,
    Else,
}

/// Auxiliary tags attached to a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, Value>,
}

/// TASK: invoke a named task through the task executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Retries after the first attempt
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaskConfig {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            tools: Vec::new(),
            parameters: Map::new(),
            retry_count: 0,
            timeout: None,
            description: None,
        }
    }
}

/// PARALLEL: run children concurrently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Concurrency bound; `None` means one slot per child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    pub fail_fast: bool,
    pub wait_for_all: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            fail_fast: true,
            wait_for_all: true,
        }
    }
}

/// CONDITION: choose the `then` or `else` child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub condition: String,
}

/// LOOP: repeat the body while the condition holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub condition: String,
    /// `None` is reported as an unbounded loop and capped at runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    pub break_on_error: bool,
}

/// WAIT: poll a condition until it holds or the timeout elapses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,
}

/// Node type + typed config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Task(TaskConfig),
    Sequence,
    Parallel(ParallelConfig),
    Condition(ConditionConfig),
    Loop(LoopConfig),
    Wait(WaitConfig),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Task(_) => NodeType::Task,
            NodeKind::Sequence => NodeType::Sequence,
            NodeKind::Parallel(_) => NodeType::Parallel,
            NodeKind::Condition(_) => NodeType::Condition,
            NodeKind::Loop(_) => NodeType::Loop,
            NodeKind::Wait(_) => NodeType::Wait,
        }
    }
}

/// A node in the workflow tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslNode {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DslNode>,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl DslNode {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            children: Vec::new(),
            metadata: NodeMetadata::default(),
        }
    }

    /// Leaf TASK node with no tools or parameters
    pub fn task(id: impl Into<NodeId>, task: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Task(TaskConfig::new(task)))
    }

    pub fn sequence(id: impl Into<NodeId>, children: Vec<DslNode>) -> Self {
        Self::new(id, NodeKind::Sequence).with_children(children)
    }

    pub fn parallel(id: impl Into<NodeId>, config: ParallelConfig, children: Vec<DslNode>) -> Self {
        Self::new(id, NodeKind::Parallel(config)).with_children(children)
    }

    /// CONDITION node with its children tagged by branch
    pub fn condition(
        id: impl Into<NodeId>,
        condition: impl Into<String>,
        then_branch: DslNode,
        else_branch: Option<DslNode>,
    ) -> Self {
        let mut children = vec![then_branch.with_branch(Branch::Then)];
        if let Some(else_node) = else_branch {
            children.push(else_node.with_branch(Branch::Else));
        }
        Self::new(
            id,
            NodeKind::Condition(ConditionConfig {
                condition: condition.into(),
            }),
        )
        .with_children(children)
    }

    pub fn looping(id: impl Into<NodeId>, config: LoopConfig, body: Vec<DslNode>) -> Self {
        Self::new(id, NodeKind::Loop(config)).with_children(body)
    }

    pub fn wait(id: impl Into<NodeId>, config: WaitConfig) -> Self {
        Self::new(id, NodeKind::Wait(config))
    }

    pub fn with_children(mut self, children: Vec<DslNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.metadata.branch = Some(branch);
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn branch(&self) -> Option<Branch> {
        self.metadata.branch
    }

    /// First child tagged with the given branch
    pub fn branch_child(&self, branch: Branch) -> Option<&DslNode> {
        self.children.iter().find(|c| c.branch() == Some(branch))
    }

    /// Pre-order traversal of this subtree (self first)
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter { stack: vec![self] }
    }

    /// Total number of nodes in this subtree
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Depth of this subtree (a leaf has depth 1)
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(DslNode::depth).max().unwrap_or(0)
    }

    /// Find a node by id in this subtree
    pub fn find(&self, id: &str) -> Option<&DslNode> {
        self.iter().find(|n| &*n.id == id)
    }
}

/// Pre-order iterator over a node tree
pub struct NodeIter<'a> {
    stack: Vec<&'a DslNode>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a DslNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Reverse so children come out in declaration order
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
