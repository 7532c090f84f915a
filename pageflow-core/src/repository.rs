//! Definition registry and execution persistence
//!
//! `FlowDefinitionRegistry` is the layered, build-time-composed lookup for
//! flow definitions; executions hold one and never mutate it. Snapshots
//! capture everything mutable about a paused execution (session stack plus
//! scopes) so it can be stored between requests and rebuilt against the
//! registry on the next one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attributes::AttributeMap;
use crate::errors::{FlowExecutionError, FlowResult};
use crate::execution::FlowExecutionStatus;
use crate::flow::Flow;

/// A layered flow-definition lookup: local definitions shadow an optional
/// parent registry. Composed once at build time, read-only afterwards.
#[derive(Default)]
pub struct FlowDefinitionRegistry {
    flows: HashMap<String, Arc<Flow>>,
    parent: Option<Arc<FlowDefinitionRegistry>>,
}

impl FlowDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry layered over `parent`; local registrations shadow it.
    pub fn with_parent(parent: Arc<FlowDefinitionRegistry>) -> Self {
        Self {
            flows: HashMap::new(),
            parent: Some(parent),
        }
    }

    pub fn register(&mut self, flow: Flow) -> Arc<Flow> {
        let flow = Arc::new(flow);
        self.flows.insert(flow.id().to_string(), flow.clone());
        flow
    }

    pub fn lookup(&self, id: &str) -> FlowResult<Arc<Flow>> {
        if let Some(flow) = self.flows.get(id) {
            return Ok(flow.clone());
        }
        match &self.parent {
            Some(parent) => parent.lookup(id),
            None => Err(FlowExecutionError::NoSuchFlow(id.to_string())),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.flows.contains_key(id)
            || self.parent.as_ref().map(|p| p.contains(id)).unwrap_or(false)
    }
}

/// The serializable record of one session in a paused execution's stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub flow_id: String,
    pub state_id: Option<String>,
    pub flow_scope: AttributeMap,
    pub flash_scope: AttributeMap,
    pub view_scope: AttributeMap,
    /// Index of the parent session in the stack, if any.
    pub parent: Option<usize>,
}

/// The serializable snapshot of a paused flow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExecutionSnapshot {
    pub key: Uuid,
    pub root_flow_id: String,
    pub status: FlowExecutionStatus,
    pub conversation_scope: AttributeMap,
    pub sessions: Vec<SessionSnapshot>,
}

/// Stores execution snapshots between requests, keyed by execution key.
/// The engine has no knowledge of the storage medium.
pub trait FlowExecutionRepository: Send + Sync {
    fn save(&self, snapshot: &FlowExecutionSnapshot) -> anyhow::Result<()>;

    fn load(&self, key: Uuid) -> anyhow::Result<Option<FlowExecutionSnapshot>>;

    fn remove(&self, key: Uuid) -> anyhow::Result<()>;
}

/// A process-local repository, sufficient for tests and single-node hosts.
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    snapshots: Mutex<HashMap<Uuid, FlowExecutionSnapshot>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().expect("repository poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FlowExecutionRepository for InMemoryExecutionRepository {
    fn save(&self, snapshot: &FlowExecutionSnapshot) -> anyhow::Result<()> {
        self.snapshots
            .lock()
            .expect("repository poisoned")
            .insert(snapshot.key, snapshot.clone());
        Ok(())
    }

    fn load(&self, key: Uuid) -> anyhow::Result<Option<FlowExecutionSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .expect("repository poisoned")
            .get(&key)
            .cloned())
    }

    fn remove(&self, key: Uuid) -> anyhow::Result<()> {
        self.snapshots
            .lock()
            .expect("repository poisoned")
            .remove(&key);
        Ok(())
    }
}
