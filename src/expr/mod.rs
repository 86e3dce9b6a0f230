//! Expressions: reference paths, conditions, `${...}` placeholders

pub mod condition;
pub mod path;
pub mod resolver;

pub use condition::{truthy, ConditionEvaluator};
pub use path::{MapScope, Scope, Segment};
pub use resolver::VariableResolver;
