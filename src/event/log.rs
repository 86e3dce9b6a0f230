//! EventLog - append-only execution audit trail
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: workflow-level and node-level lifecycle events
//! - EventLog: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsl::NodeType;

/// Single event in the execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since log creation (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All event types (2 levels)
///
/// Uses Arc<str> for id fields to enable cheap cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════
    WorkflowStarted {
        workflow_id: Arc<str>,
        execution_id: Arc<str>,
        node_count: usize,
    },
    WorkflowRetrying {
        execution_id: Arc<str>,
        /// Retry number (1 = first retry)
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },
    WorkflowCompleted {
        execution_id: Arc<str>,
        duration_ms: u64,
    },
    WorkflowFailed {
        execution_id: Arc<str>,
        error: String,
        error_code: String,
    },
    WorkflowCancelled {
        execution_id: Arc<str>,
    },

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeStarted {
        node_id: Arc<str>,
        node_type: NodeType,
    },
    NodeCompleted {
        node_id: Arc<str>,
        output: Arc<Value>,
        duration_ms: u64,
    },
    NodeFailed {
        node_id: Arc<str>,
        error: String,
        duration_ms: u64,
    },
    NodeCancelled {
        node_id: Arc<str>,
    },
    TaskRetrying {
        node_id: Arc<str>,
        /// Retry number (1 = first retry)
        attempt: u32,
        error: String,
    },
}

impl EventKind {
    /// Extract node_id if event is node-related
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeCancelled { node_id }
            | Self::TaskRetrying { node_id, .. } => Some(&**node_id),
            Self::WorkflowStarted { .. }
            | Self::WorkflowRetrying { .. }
            | Self::WorkflowCompleted { .. }
            | Self::WorkflowFailed { .. }
            | Self::WorkflowCancelled { .. } => None,
        }
    }

    /// Check if this is a workflow-level event
    pub fn is_workflow_event(&self) -> bool {
        self.node_id().is_none()
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned - use `with_events` for zero-copy access)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback
    ///
    /// Holds read lock for duration of callback - keep it short.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    pub fn filter_node(&self, node_id: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.node_id() == Some(node_id))
                .cloned()
                .collect()
        })
    }

    pub fn workflow_events(&self) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.is_workflow_event())
                .cloned()
                .collect()
        })
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started(node: &str) -> EventKind {
        EventKind::NodeStarted {
            node_id: Arc::from(node),
            node_type: NodeType::Task,
        }
    }

    #[test]
    fn node_id_extraction() {
        assert_eq!(started("a").node_id(), Some("a"));
        let wf = EventKind::WorkflowCancelled {
            execution_id: "e".into(),
        };
        assert_eq!(wf.node_id(), None);
        assert!(wf.is_workflow_event());
    }

    #[test]
    fn serializes_with_type_tag() {
        let kind = EventKind::NodeCompleted {
            node_id: "greet".into(),
            output: Arc::new(json!({"message": "Hello"})),
            duration_ms: 150,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "node_completed");
        assert_eq!(json["node_id"], "greet");
        assert_eq!(json["output"]["message"], "Hello");
    }

    #[test]
    fn ids_are_monotonic_and_filterable() {
        let log = EventLog::new();
        assert!(log.is_empty());
        let a = log.emit(started("a"));
        let b = log.emit(started("b"));
        log.emit(EventKind::NodeCancelled { node_id: "a".into() });
        assert_eq!((a, b), (0, 1));
        assert_eq!(log.len(), 3);
        assert_eq!(log.filter_node("a").len(), 2);
        assert!(log.workflow_events().is_empty());
        assert_eq!(log.to_json().as_array().unwrap().len(), 3);
    }

    #[test]
    fn concurrent_emits_keep_every_event() {
        let log = EventLog::new();
        std::thread::scope(|s| {
            for t in 0..4 {
                let log = log.clone();
                s.spawn(move || {
                    for i in 0..25 {
                        log.emit(started(&format!("n{}_{}", t, i)));
                    }
                });
            }
        });
        let mut ids: Vec<u64> = log.events().iter().map(|e| e.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..100).collect::<Vec<_>>());
    }
}
