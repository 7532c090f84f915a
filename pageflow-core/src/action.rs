//! Actions
//!
//! An `Action` is a unit of application behavior invoked at well-defined
//! points: state entry and exit, transition gating, flow start and end, and
//! the steps of an action state. Actions report a closed `ActionResult`;
//! raising `Err` means the action itself broke and execution moves to
//! exception handling.

use std::collections::HashMap;
use std::sync::Arc;

use crate::attributes::AttributeMap;
use crate::context::RequestContext;
use crate::errors::{FlowExecutionError, FlowResult};
use crate::event::Event;

/// The closed set of outcomes an action can report.
#[derive(Debug, Clone)]
pub enum ActionResult {
    /// The action completed normally.
    Success,
    /// The action completed but is reporting a business failure.
    Error,
    /// A custom outcome with an id and an optional payload.
    Outcome { id: String, attributes: AttributeMap },
}

impl ActionResult {
    /// A custom outcome without payload.
    pub fn outcome(id: impl Into<String>) -> Self {
        Self::Outcome {
            id: id.into(),
            attributes: AttributeMap::new(),
        }
    }

    /// The event id this result maps to.
    pub fn event_id(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Outcome { id, .. } => id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Convert the result into an event attributed to `source`.
    pub fn into_event(self, source: &str) -> Event {
        match self {
            Self::Outcome { id, attributes } => Event::with_attributes(source, id, attributes),
            other => Event::new(source, other.event_id()),
        }
    }
}

/// A unit of application behavior executed within a request.
pub trait Action: Send + Sync {
    /// A stable name for diagnostics. Defaults to "anonymous".
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Execute against the current request. `Err` aborts the surrounding
    /// step and routes to exception handling.
    fn execute(&self, ctx: &mut RequestContext) -> anyhow::Result<ActionResult>;
}

/// An action backed by a closure, named for diagnostics.
pub struct FnAction {
    name: String,
    f: Box<dyn Fn(&mut RequestContext) -> anyhow::Result<ActionResult> + Send + Sync>,
}

impl FnAction {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&mut RequestContext) -> anyhow::Result<ActionResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl Action for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &mut RequestContext) -> anyhow::Result<ActionResult> {
        (self.f)(ctx)
    }
}

/// A named lookup table of shared actions, populated by the host
/// application before flows are assembled.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn Action>) {
        self.actions.insert(name.into(), action);
    }

    pub fn lookup(&self, name: &str) -> FlowResult<Arc<dyn Action>> {
        self.actions.get(name).cloned().ok_or_else(|| {
            FlowExecutionError::Definition(format!("no action '{name}' registered"))
        })
    }
}

/// An ordered chain of actions executed as one step.
#[derive(Clone, Default)]
pub struct ActionList(Vec<Arc<dyn Action>>);

impl ActionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Arc<dyn Action>) {
        self.0.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Action>> {
        self.0.iter()
    }

    /// Execute every action in order, discarding results. The first `Err`
    /// stops the chain and is wrapped with the failing action's name.
    pub fn execute_all(&self, ctx: &mut RequestContext) -> FlowResult<()> {
        for action in &self.0 {
            action
                .execute(ctx)
                .map_err(|e| ctx.action_error(action.name(), e))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ActionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|a| a.name()).collect();
        f.debug_tuple("ActionList").field(&names).finish()
    }
}

impl FromIterator<Arc<dyn Action>> for ActionList {
    fn from_iter<T: IntoIterator<Item = Arc<dyn Action>>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
