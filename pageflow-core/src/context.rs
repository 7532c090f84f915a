//! Request context
//!
//! One `RequestContext` exists per inbound request. It borrows the
//! execution and the caller's external context mutably for the duration of
//! the request, owns the request scope, and carries the current event as
//! it changes hands between actions and transitions. Nothing here is
//! ambient; every collaborator receives the context explicitly.

use std::sync::Arc;

use crate::attributes::{AttributeMap, ScopeType};
use crate::errors::{FlowExecutionError, FlowResult};
use crate::event::Event;
use crate::execution::FlowExecution;
use crate::flow::Flow;
use crate::repository::FlowDefinitionRegistry;
use crate::view::ExternalContext;

pub struct RequestContext<'a> {
    execution: &'a mut FlowExecution,
    external: &'a mut dyn ExternalContext,
    request_scope: AttributeMap,
    current_event: Option<Event>,
}

impl<'a> RequestContext<'a> {
    pub fn new(
        execution: &'a mut FlowExecution,
        external: &'a mut dyn ExternalContext,
        current_event: Option<Event>,
    ) -> Self {
        Self {
            execution,
            external,
            request_scope: AttributeMap::new(),
            current_event,
        }
    }

    // ─── scopes ───

    pub fn request_scope(&self) -> &AttributeMap {
        &self.request_scope
    }

    pub fn request_scope_mut(&mut self) -> &mut AttributeMap {
        &mut self.request_scope
    }

    pub fn flash_scope(&self) -> FlowResult<&AttributeMap> {
        Ok(self.execution.active_session()?.flash_scope())
    }

    pub fn flash_scope_mut(&mut self) -> FlowResult<&mut AttributeMap> {
        Ok(self.execution.active_session_mut()?.flash_scope_mut())
    }

    pub fn view_scope(&self) -> FlowResult<&AttributeMap> {
        Ok(self.execution.active_session()?.view_scope())
    }

    pub fn view_scope_mut(&mut self) -> FlowResult<&mut AttributeMap> {
        Ok(self.execution.active_session_mut()?.view_scope_mut())
    }

    pub fn flow_scope(&self) -> FlowResult<&AttributeMap> {
        Ok(self.execution.active_session()?.flow_scope())
    }

    pub fn flow_scope_mut(&mut self) -> FlowResult<&mut AttributeMap> {
        Ok(self.execution.active_session_mut()?.flow_scope_mut())
    }

    pub fn conversation_scope(&self) -> &AttributeMap {
        self.execution.conversation_scope()
    }

    pub fn conversation_scope_mut(&mut self) -> &mut AttributeMap {
        self.execution.conversation_scope_mut()
    }

    pub fn scope(&self, scope: ScopeType) -> FlowResult<&AttributeMap> {
        match scope {
            ScopeType::Request => Ok(&self.request_scope),
            ScopeType::Flash => self.flash_scope(),
            ScopeType::View => self.view_scope(),
            ScopeType::Flow => self.flow_scope(),
            ScopeType::Conversation => Ok(self.conversation_scope()),
        }
    }

    pub fn scope_mut(&mut self, scope: ScopeType) -> FlowResult<&mut AttributeMap> {
        match scope {
            ScopeType::Request => Ok(&mut self.request_scope),
            ScopeType::Flash => self.flash_scope_mut(),
            ScopeType::View => self.view_scope_mut(),
            ScopeType::Flow => self.flow_scope_mut(),
            ScopeType::Conversation => Ok(self.conversation_scope_mut()),
        }
    }

    /// Retire flash scope after a completed render.
    pub fn clear_flash(&mut self) -> FlowResult<()> {
        self.flash_scope_mut()?.clear();
        Ok(())
    }

    /// Compose every live scope into one map for rendering: request over
    /// flash over view over flow over conversation, inner keys shadowing
    /// outer ones. Usable even when no session is active (final views).
    pub fn render_model(&self) -> FlowResult<AttributeMap> {
        let mut model = self.conversation_scope().clone();
        if let Ok(session) = self.execution.active_session() {
            model = session.flow_scope().union(&model);
            model = session.view_scope().union(&model);
            model = session.flash_scope().union(&model);
        }
        Ok(self.request_scope.union(&model))
    }

    // ─── event ───

    pub fn current_event(&self) -> Option<&Event> {
        self.current_event.as_ref()
    }

    pub fn set_current_event(&mut self, event: Option<Event>) {
        self.current_event = event;
    }

    pub fn event_id(&self) -> Option<&str> {
        self.current_event.as_ref().map(Event::id)
    }

    // ─── execution ───

    /// The definition of the active session's flow, cloned out so callers
    /// can hold it across further context mutation.
    pub fn active_flow(&self) -> FlowResult<Arc<Flow>> {
        Ok(self.execution.active_session()?.flow().clone())
    }

    pub fn current_state_id(&self) -> Option<String> {
        self.execution
            .active_session()
            .ok()
            .and_then(|s| s.state_id().map(str::to_string))
    }

    pub fn set_current_state(&mut self, id: &str) -> FlowResult<()> {
        self.execution.active_session_mut()?.set_state_id(id);
        Ok(())
    }

    pub fn push_session(&mut self, flow: Arc<Flow>) {
        self.execution.push_session(flow);
    }

    pub fn pop_session(&mut self) -> FlowResult<()> {
        self.execution.pop_session().map(|_| ())
    }

    pub fn session_depth(&self) -> usize {
        self.execution.session_depth()
    }

    pub fn registry(&self) -> &FlowDefinitionRegistry {
        self.execution.registry()
    }

    pub fn always_redirect_on_pause(&self) -> bool {
        self.execution.always_redirect_on_pause()
    }

    // ─── external ───

    pub fn external(&self) -> &dyn ExternalContext {
        &*self.external
    }

    pub fn external_mut(&mut self) -> &mut dyn ExternalContext {
        &mut *self.external
    }

    // ─── error builders ───

    /// Wrap an action failure with the current flow and state.
    pub fn action_error(&self, action: &str, error: anyhow::Error) -> FlowExecutionError {
        FlowExecutionError::ActionExecution {
            flow_id: self
                .active_flow()
                .map(|f| f.id().to_string())
                .unwrap_or_else(|_| "<none>".to_string()),
            state_id: self.current_state_id(),
            action: action.to_string(),
            message: format!("{error:#}"),
        }
    }

    /// A no-matching-transition failure for the current position.
    pub fn no_matching_transition(&self) -> FlowExecutionError {
        FlowExecutionError::NoMatchingTransition {
            flow_id: self
                .active_flow()
                .map(|f| f.id().to_string())
                .unwrap_or_else(|_| "<none>".to_string()),
            state_id: self.current_state_id().unwrap_or_else(|| "<none>".to_string()),
            event_id: self.event_id().unwrap_or("<none>").to_string(),
        }
    }
}
