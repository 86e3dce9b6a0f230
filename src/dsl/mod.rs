//! DSL layer: node tree, parser, validator
//!
//! Step lists (JSON/YAML) → [`DslParser`] → [`DslNode`] tree → [`DslValidator`].

pub mod catalog;
pub mod node;
pub mod parser;
pub mod validator;

pub use catalog::Catalog;
pub use node::{
    Branch, ConditionConfig, DslNode, LoopConfig, NodeId, NodeKind, NodeMetadata, NodeType,
    ParallelConfig, TaskConfig, WaitConfig,
};
pub use parser::{validate_node_id, DslParser, ParseResult};
pub use validator::{DslValidator, Severity, ValidationIssue, ValidationResult};
