//! Flow execution
//!
//! A `FlowExecution` is one running conversation: the session stack, the
//! conversation scope, and a lifecycle status. It is single-threaded per
//! request; concurrency exists only across distinct executions, which
//! share nothing mutable. Pausing is a plain return to the caller, and the
//! whole execution serializes to a snapshot so the next request can rebuild
//! it, possibly on another node.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attributes::AttributeMap;
use crate::context::RequestContext;
use crate::errors::{FlowExecutionError, FlowResult};
use crate::event::Event;
use crate::flow::Flow;
use crate::repository::{FlowDefinitionRegistry, FlowExecutionSnapshot, SessionSnapshot};
use crate::state::EnterOutcome;
use crate::view::ExternalContext;

/// Where an execution is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowExecutionStatus {
    /// Built but never started.
    Created,
    /// Currently processing a request.
    Active,
    /// Waiting on the next event, resumable.
    Paused,
    /// The root session ended; the execution is inactive.
    Ended,
}

/// What one request against an execution produced.
#[derive(Debug)]
pub enum FlowExecutionOutcome {
    /// The execution paused; the caller renders or follows the redirect.
    Paused,
    /// The root flow ended with an outcome event and mapped output.
    Ended {
        outcome: Event,
        output: AttributeMap,
    },
}

/// One entry in the execution's session stack: a flow being run, its
/// current state, and its session-local scopes. The parent link is a stack
/// index, never a live reference, so the whole stack serializes plainly.
pub struct FlowSession {
    flow: Arc<Flow>,
    state_id: Option<String>,
    flow_scope: AttributeMap,
    flash_scope: AttributeMap,
    view_scope: AttributeMap,
    parent: Option<usize>,
}

impl FlowSession {
    fn new(flow: Arc<Flow>, parent: Option<usize>) -> Self {
        Self {
            flow,
            state_id: None,
            flow_scope: AttributeMap::new(),
            flash_scope: AttributeMap::new(),
            view_scope: AttributeMap::new(),
            parent,
        }
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn state_id(&self) -> Option<&str> {
        self.state_id.as_deref()
    }

    pub(crate) fn set_state_id(&mut self, id: &str) {
        self.state_id = Some(id.to_string());
    }

    pub fn flow_scope(&self) -> &AttributeMap {
        &self.flow_scope
    }

    pub(crate) fn flow_scope_mut(&mut self) -> &mut AttributeMap {
        &mut self.flow_scope
    }

    pub fn flash_scope(&self) -> &AttributeMap {
        &self.flash_scope
    }

    pub(crate) fn flash_scope_mut(&mut self) -> &mut AttributeMap {
        &mut self.flash_scope
    }

    pub fn view_scope(&self) -> &AttributeMap {
        &self.view_scope
    }

    pub(crate) fn view_scope_mut(&mut self) -> &mut AttributeMap {
        &mut self.view_scope
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }
}

/// A single running conversation over a flow definition.
pub struct FlowExecution {
    key: Uuid,
    root: Arc<Flow>,
    registry: Arc<FlowDefinitionRegistry>,
    sessions: Vec<FlowSession>,
    conversation_scope: AttributeMap,
    status: FlowExecutionStatus,
    always_redirect_on_pause: bool,
}

impl FlowExecution {
    pub fn new(root: Arc<Flow>, registry: Arc<FlowDefinitionRegistry>) -> Self {
        Self {
            key: Uuid::new_v4(),
            root,
            registry,
            sessions: Vec::new(),
            conversation_scope: AttributeMap::new(),
            status: FlowExecutionStatus::Created,
            always_redirect_on_pause: false,
        }
    }

    /// Redirect after every pause (POST-redirect-GET), unless a view
    /// overrides it or the request is embedded/Ajax.
    pub fn with_always_redirect_on_pause(mut self, redirect: bool) -> Self {
        self.always_redirect_on_pause = redirect;
        self
    }

    // ─── accessors ───

    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn status(&self) -> FlowExecutionStatus {
        self.status
    }

    pub fn has_ended(&self) -> bool {
        self.status == FlowExecutionStatus::Ended
    }

    pub fn root_flow(&self) -> &Arc<Flow> {
        &self.root
    }

    pub fn session_depth(&self) -> usize {
        self.sessions.len()
    }

    pub fn current_state_id(&self) -> Option<&str> {
        self.sessions.last().and_then(|s| s.state_id())
    }

    /// The session stack, root first. Read-only; mutation happens through
    /// a request context.
    pub fn sessions(&self) -> &[FlowSession] {
        &self.sessions
    }

    pub fn conversation_scope(&self) -> &AttributeMap {
        &self.conversation_scope
    }

    pub fn conversation_scope_mut(&mut self) -> &mut AttributeMap {
        &mut self.conversation_scope
    }

    pub fn registry(&self) -> &FlowDefinitionRegistry {
        &self.registry
    }

    pub fn always_redirect_on_pause(&self) -> bool {
        self.always_redirect_on_pause
    }

    pub(crate) fn active_session(&self) -> FlowResult<&FlowSession> {
        self.sessions.last().ok_or_else(|| {
            FlowExecutionError::IllegalState("no active flow session".to_string())
        })
    }

    pub(crate) fn active_session_mut(&mut self) -> FlowResult<&mut FlowSession> {
        self.sessions.last_mut().ok_or_else(|| {
            FlowExecutionError::IllegalState("no active flow session".to_string())
        })
    }

    pub(crate) fn push_session(&mut self, flow: Arc<Flow>) {
        let parent = self.sessions.len().checked_sub(1);
        self.sessions.push(FlowSession::new(flow, parent));
    }

    pub(crate) fn pop_session(&mut self) -> FlowResult<FlowSession> {
        self.sessions.pop().ok_or_else(|| {
            FlowExecutionError::IllegalState("session stack is empty".to_string())
        })
    }

    // ─── requests ───

    /// Start the execution with the caller's input.
    pub fn start(
        &mut self,
        input: AttributeMap,
        external: &mut dyn ExternalContext,
    ) -> FlowResult<FlowExecutionOutcome> {
        if self.status != FlowExecutionStatus::Created {
            return Err(FlowExecutionError::IllegalState(format!(
                "execution {} cannot start from status {:?}",
                self.key, self.status
            )));
        }
        tracing::info!(key = %self.key, flow = self.root.id(), "starting flow execution");
        self.status = FlowExecutionStatus::Active;
        self.push_session(self.root.clone());
        let root = self.root.clone();
        let result = {
            let mut ctx = RequestContext::new(self, external, None);
            root.start(&mut ctx, input)
        };
        let result = self.unwind_ended_sessions(result, external);
        self.absorb(result)
    }

    /// Deliver a user event to the paused execution.
    pub fn signal_event(
        &mut self,
        event: Event,
        external: &mut dyn ExternalContext,
    ) -> FlowResult<FlowExecutionOutcome> {
        self.require_paused("signal an event on")?;
        tracing::info!(key = %self.key, event = event.id(), "resuming flow execution");
        self.status = FlowExecutionStatus::Active;
        let flow = self.active_session()?.flow().clone();
        let result = {
            let mut ctx = RequestContext::new(self, external, Some(event));
            flow.resume(&mut ctx)
        };
        let result = self.unwind_ended_sessions(result, external);
        self.absorb(result)
    }

    /// Resume without an event (a refresh): re-renders the paused view.
    pub fn resume(&mut self, external: &mut dyn ExternalContext) -> FlowResult<FlowExecutionOutcome> {
        self.require_paused("refresh")?;
        self.status = FlowExecutionStatus::Active;
        let flow = self.active_session()?.flow().clone();
        let result = {
            let mut ctx = RequestContext::new(self, external, None);
            flow.resume(&mut ctx)
        };
        let result = self.unwind_ended_sessions(result, external);
        self.absorb(result)
    }

    /// While a request ends a session with parents still on the stack, the
    /// outcome belongs to the parent's subflow state, not the caller.
    /// Delivering it there may end the parent session too, so this loops
    /// until the stack is empty or the execution pauses.
    fn unwind_ended_sessions(
        &mut self,
        mut result: FlowResult<EnterOutcome>,
        external: &mut dyn ExternalContext,
    ) -> FlowResult<EnterOutcome> {
        loop {
            match result {
                Ok(EnterOutcome::SessionEnded { outcome, output }) if !self.sessions.is_empty() => {
                    let parent = match self.active_session() {
                        Ok(session) => session.flow().clone(),
                        Err(e) => return Err(e),
                    };
                    result = {
                        let mut ctx = RequestContext::new(self, external, None);
                        parent.resume_from_subflow(&mut ctx, outcome, output)
                    };
                }
                other => return other,
            }
        }
    }

    fn require_paused(&self, verb: &str) -> FlowResult<()> {
        if self.status != FlowExecutionStatus::Paused {
            return Err(FlowExecutionError::IllegalState(format!(
                "cannot {verb} execution {} in status {:?}",
                self.key, self.status
            )));
        }
        Ok(())
    }

    /// Settle the execution's status from a request's outcome. Errors pin
    /// the execution at its last successfully entered state so a retry or
    /// repository expiry can deal with it. A failure before any state was
    /// entered leaves nothing to resume; the partial stack is discarded
    /// and the execution returns to `Created` so start can be retried.
    fn absorb(&mut self, result: FlowResult<EnterOutcome>) -> FlowResult<FlowExecutionOutcome> {
        match result {
            Ok(EnterOutcome::Paused) => {
                self.status = FlowExecutionStatus::Paused;
                Ok(FlowExecutionOutcome::Paused)
            }
            Ok(EnterOutcome::SessionEnded { outcome, output }) => {
                self.status = FlowExecutionStatus::Ended;
                tracing::info!(key = %self.key, outcome = outcome.id(), "flow execution ended");
                Ok(FlowExecutionOutcome::Ended { outcome, output })
            }
            Err(e) => {
                self.status = if self.sessions.is_empty() {
                    FlowExecutionStatus::Ended
                } else if self.current_state_id().is_none() {
                    self.sessions.clear();
                    FlowExecutionStatus::Created
                } else {
                    FlowExecutionStatus::Paused
                };
                tracing::warn!(key = %self.key, error = %e, "flow execution request failed");
                Err(e)
            }
        }
    }

    // ─── persistence ───

    /// Capture everything mutable about this execution.
    pub fn snapshot(&self) -> FlowExecutionSnapshot {
        FlowExecutionSnapshot {
            key: self.key,
            root_flow_id: self.root.id().to_string(),
            status: self.status,
            conversation_scope: self.conversation_scope.clone(),
            sessions: self
                .sessions
                .iter()
                .map(|s| SessionSnapshot {
                    flow_id: s.flow.id().to_string(),
                    state_id: s.state_id.clone(),
                    flow_scope: s.flow_scope.clone(),
                    flash_scope: s.flash_scope.clone(),
                    view_scope: s.view_scope.clone(),
                    parent: s.parent,
                })
                .collect(),
        }
    }

    /// Rebuild an execution from a snapshot against the definitions in
    /// `registry`. Nested session flows resolve through their parent's
    /// inline flows first, matching how they were spawned.
    pub fn restore(
        snapshot: FlowExecutionSnapshot,
        registry: Arc<FlowDefinitionRegistry>,
    ) -> FlowResult<Self> {
        let root = registry.lookup(&snapshot.root_flow_id)?;
        let mut sessions: Vec<FlowSession> = Vec::with_capacity(snapshot.sessions.len());
        for record in snapshot.sessions {
            let flow = match record.parent {
                None => root.clone(),
                Some(parent_idx) => {
                    let parent = sessions.get(parent_idx).ok_or_else(|| {
                        FlowExecutionError::IllegalState(format!(
                            "snapshot session parent index {parent_idx} is out of range"
                        ))
                    })?;
                    parent.flow.resolve_subflow(&record.flow_id, &registry)?
                }
            };
            sessions.push(FlowSession {
                flow,
                state_id: record.state_id,
                flow_scope: record.flow_scope,
                flash_scope: record.flash_scope,
                view_scope: record.view_scope,
                parent: record.parent,
            });
        }
        Ok(Self {
            key: snapshot.key,
            root,
            registry,
            sessions,
            conversation_scope: snapshot.conversation_scope,
            status: snapshot.status,
            always_redirect_on_pause: false,
        })
    }
}
