//! States
//!
//! A `State` couples the contract shared by every state (entry and exit
//! actions, transitions, exception handlers) with a `StateKind` tagged
//! union carrying the variant behavior. Definition objects are immutable
//! once built and shared across executions behind `Arc`.

use std::sync::Arc;

use crate::action::ActionList;
use crate::attributes::AttributeMap;
use crate::context::RequestContext;
use crate::errors::{FlowExecutionError, FlowResult};
use crate::event::Event;
use crate::flow::Variable;
use crate::handler::{ExceptionHandlerSet, FlowExecutionExceptionHandler};
use crate::mapping::{OutputMapper, SubflowAttributeMapper};
use crate::transition::{Transition, TransitionSet};
use crate::view::ViewFactory;

/// What entering a state left the execution doing.
#[derive(Debug)]
pub enum EnterOutcome {
    /// The machine stopped on a view (or a requested redirect) and control
    /// returns to the caller; the execution stays resumable.
    Paused,
    /// The active session ended with an outcome event and mapped output.
    SessionEnded {
        outcome: Event,
        output: AttributeMap,
    },
}

/// View-state configuration beyond the common state contract.
pub struct ViewStateData {
    pub factory: Arc<dyn ViewFactory>,
    pub variables: Vec<Variable>,
    /// Force a redirect-after-pause on entry. `None` defers to the
    /// execution-wide always-redirect-on-pause setting.
    pub redirect: Option<bool>,
    pub popup: bool,
    /// Redirect when an internal transition re-pauses in this state.
    /// `None` defers to the execution-wide setting (suppressed for Ajax).
    pub redirect_in_same_state: Option<bool>,
}

/// The variant behavior of a state.
pub enum StateKind {
    /// Runs actions until one's outcome matches an outgoing transition.
    Action { actions: ActionList },
    /// Pauses the execution to render a view and await an event.
    View(ViewStateData),
    /// Routes immediately through its transition set.
    Decision,
    /// Spawns a child flow session and resumes on its outcome.
    Subflow {
        subflow_id: String,
        mapper: Option<Arc<dyn SubflowAttributeMapper>>,
    },
    /// Ends the active session, mapping output and optionally rendering a
    /// final view when the whole execution ends.
    End {
        factory: Option<Arc<dyn ViewFactory>>,
        output_mapper: Option<Arc<dyn OutputMapper>>,
    },
}

impl std::fmt::Debug for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action { .. } => write!(f, "Action"),
            Self::View(_) => write!(f, "View"),
            Self::Decision => write!(f, "Decision"),
            Self::Subflow { subflow_id, .. } => write!(f, "Subflow({subflow_id})"),
            Self::End { .. } => write!(f, "End"),
        }
    }
}

/// A node in the flow's state machine.
pub struct State {
    id: String,
    kind: StateKind,
    entry_actions: ActionList,
    exit_actions: ActionList,
    transitions: TransitionSet,
    exception_handlers: ExceptionHandlerSet,
}

impl State {
    fn new(id: impl Into<String>, kind: StateKind) -> Self {
        Self {
            id: id.into(),
            kind,
            entry_actions: ActionList::new(),
            exit_actions: ActionList::new(),
            transitions: TransitionSet::new(),
            exception_handlers: ExceptionHandlerSet::new(),
        }
    }

    pub fn action(id: impl Into<String>, actions: ActionList) -> Self {
        Self::new(id, StateKind::Action { actions })
    }

    pub fn view(id: impl Into<String>, factory: Arc<dyn ViewFactory>) -> Self {
        Self::new(
            id,
            StateKind::View(ViewStateData {
                factory,
                variables: Vec::new(),
                redirect: None,
                popup: false,
                redirect_in_same_state: None,
            }),
        )
    }

    pub fn decision(id: impl Into<String>) -> Self {
        Self::new(id, StateKind::Decision)
    }

    pub fn subflow(id: impl Into<String>, subflow_id: impl Into<String>) -> Self {
        Self::new(
            id,
            StateKind::Subflow {
                subflow_id: subflow_id.into(),
                mapper: None,
            },
        )
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(
            id,
            StateKind::End {
                factory: None,
                output_mapper: None,
            },
        )
    }

    // ─── builders ───

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_entry_action(mut self, action: Arc<dyn crate::action::Action>) -> Self {
        self.entry_actions.push(action);
        self
    }

    pub fn with_exit_action(mut self, action: Arc<dyn crate::action::Action>) -> Self {
        self.exit_actions.push(action);
        self
    }

    pub fn with_exception_handler(
        mut self,
        handler: Box<dyn FlowExecutionExceptionHandler>,
    ) -> Self {
        self.exception_handlers.push(handler);
        self
    }

    /// Attach a view-scoped variable. Panics when the state is not a view
    /// state; definition wiring is a construction-time contract.
    pub fn with_view_variable(mut self, variable: Variable) -> Self {
        match &mut self.kind {
            StateKind::View(data) => data.variables.push(variable),
            other => panic!("view variable on non-view state '{}' ({other:?})", self.id),
        }
        self
    }

    /// Force or suppress redirect-after-pause on entry. Panics when the
    /// state is not a view state.
    pub fn with_redirect(mut self, redirect: bool) -> Self {
        match &mut self.kind {
            StateKind::View(data) => data.redirect = Some(redirect),
            other => panic!("redirect flag on non-view state '{}' ({other:?})", self.id),
        }
        self
    }

    /// Mark the view to render in a popup when redirecting. Panics when
    /// the state is not a view state.
    pub fn with_popup(mut self) -> Self {
        match &mut self.kind {
            StateKind::View(data) => data.popup = true,
            other => panic!("popup flag on non-view state '{}' ({other:?})", self.id),
        }
        self
    }

    /// Control re-render versus redirect for internal transitions that
    /// keep the execution in this view state.
    pub fn with_redirect_in_same_state(mut self, redirect: bool) -> Self {
        match &mut self.kind {
            StateKind::View(data) => data.redirect_in_same_state = Some(redirect),
            other => panic!(
                "redirect-in-same-state flag on non-view state '{}' ({other:?})",
                self.id
            ),
        }
        self
    }

    /// Attach a subflow attribute mapper. Panics when the state is not a
    /// subflow state.
    pub fn with_subflow_mapper(mut self, mapper: Arc<dyn SubflowAttributeMapper>) -> Self {
        match &mut self.kind {
            StateKind::Subflow { mapper: slot, .. } => *slot = Some(mapper),
            other => panic!("subflow mapper on non-subflow state '{}' ({other:?})", self.id),
        }
        self
    }

    /// Attach an output mapper. Panics when the state is not an end state.
    pub fn with_output_mapper(mut self, mapper: Arc<dyn OutputMapper>) -> Self {
        match &mut self.kind {
            StateKind::End {
                output_mapper: slot,
                ..
            } => *slot = Some(mapper),
            other => panic!("output mapper on non-end state '{}' ({other:?})", self.id),
        }
        self
    }

    /// Attach a final-response view factory. Panics when the state is not
    /// an end state.
    pub fn with_final_view(mut self, factory: Arc<dyn ViewFactory>) -> Self {
        match &mut self.kind {
            StateKind::End { factory: slot, .. } => *slot = Some(factory),
            other => panic!("final view on non-end state '{}' ({other:?})", self.id),
        }
        self
    }

    // ─── accessors ───

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &StateKind {
        &self.kind
    }

    pub fn transitions(&self) -> &TransitionSet {
        &self.transitions
    }

    pub fn exception_handlers(&self) -> &ExceptionHandlerSet {
        &self.exception_handlers
    }

    /// Whether this state pauses awaiting an event that it can route.
    pub fn is_transitionable(&self) -> bool {
        !matches!(self.kind, StateKind::End { .. })
    }

    // ─── lifecycle ───

    /// Enter this state: record it as current, run entry actions, then the
    /// variant behavior.
    pub fn enter(&self, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        tracing::debug!(state = self.id.as_str(), kind = ?self.kind, "entering state");
        ctx.set_current_state(&self.id)?;
        self.entry_actions.execute_all(ctx)?;
        self.do_enter(ctx)
    }

    /// Exit this state: run exit actions and destroy view-scoped state.
    pub fn exit(&self, ctx: &mut RequestContext) -> FlowResult<()> {
        self.exit_actions.execute_all(ctx)?;
        if matches!(self.kind, StateKind::View(_)) {
            ctx.view_scope_mut()?.clear();
        }
        Ok(())
    }

    fn do_enter(&self, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        match &self.kind {
            StateKind::Action { actions } => self.enter_action(actions, ctx),
            StateKind::View(data) => self.enter_view(data, ctx),
            StateKind::Decision => self.enter_decision(ctx),
            StateKind::Subflow { subflow_id, mapper } => {
                self.enter_subflow(subflow_id, mapper.as_ref(), ctx)
            }
            StateKind::End {
                factory,
                output_mapper,
            } => self.enter_end(factory.as_deref(), output_mapper.as_deref(), ctx),
        }
    }

    /// Run the action chain. The first action whose outcome event matches
    /// an outgoing transition fires it and stops the chain; non-matching
    /// outcomes fall through to the next action.
    fn enter_action(&self, actions: &ActionList, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        let flow = ctx.active_flow()?;
        for action in actions.iter() {
            let result = action
                .execute(ctx)
                .map_err(|e| ctx.action_error(action.name(), e))?;
            let event = result.into_event(self.id());
            tracing::debug!(state = self.id.as_str(), event = event.id(), "action outcome");
            ctx.set_current_event(Some(event));
            if let Some(outcome) = flow.try_transition(self, ctx)? {
                return Ok(outcome);
            }
        }
        Err(ctx.no_matching_transition())
    }

    fn enter_view(&self, data: &ViewStateData, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        for variable in &data.variables {
            let value = variable.value.evaluate(ctx)?;
            ctx.view_scope_mut()?.put(variable.name.clone(), value);
        }
        if ctx.external().is_response_complete() {
            return Ok(EnterOutcome::Paused);
        }
        let redirect = data
            .redirect
            .unwrap_or_else(|| !ctx.external().is_embedded() && ctx.always_redirect_on_pause());
        if redirect {
            ctx.external_mut().request_flow_execution_redirect();
            if data.popup {
                ctx.external_mut().request_redirect_in_popup();
            }
            return Ok(EnterOutcome::Paused);
        }
        self.render_view(data, ctx)?;
        Ok(EnterOutcome::Paused)
    }

    fn enter_decision(&self, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        let flow = ctx.active_flow()?;
        match flow.try_transition(self, ctx)? {
            Some(outcome) => Ok(outcome),
            None => Err(ctx.no_matching_transition()),
        }
    }

    fn enter_subflow(
        &self,
        subflow_id: &str,
        mapper: Option<&Arc<dyn SubflowAttributeMapper>>,
        ctx: &mut RequestContext,
    ) -> FlowResult<EnterOutcome> {
        let input = match mapper {
            Some(m) => m.map_subflow_input(ctx)?,
            None => AttributeMap::new(),
        };
        let parent = ctx.active_flow()?;
        let child = parent.resolve_subflow(subflow_id, ctx.registry())?;
        tracing::debug!(
            parent = parent.id(),
            child = child.id(),
            "spawning subflow session"
        );
        ctx.push_session(child.clone());
        match child.start(ctx, input)? {
            EnterOutcome::Paused => Ok(EnterOutcome::Paused),
            EnterOutcome::SessionEnded { outcome, output } => {
                // The end state already popped the child session; we are
                // back in the parent here.
                self.handle_subflow_outcome(outcome, output, ctx)
            }
        }
    }

    /// Consume an ended child session's outcome: map its output back into
    /// the parent and route the outcome event through this state's
    /// transitions. Also reached when a paused child ends on a later
    /// request.
    pub fn handle_subflow_outcome(
        &self,
        outcome: Event,
        output: AttributeMap,
        ctx: &mut RequestContext,
    ) -> FlowResult<EnterOutcome> {
        let mapper = match &self.kind {
            StateKind::Subflow { mapper, .. } => mapper.clone(),
            _ => {
                return Err(FlowExecutionError::IllegalState(format!(
                    "state '{}' is not a subflow state and cannot consume a subflow outcome",
                    self.id
                )))
            }
        };
        if let Some(mapper) = mapper {
            mapper.map_subflow_output(&output, ctx)?;
        }
        ctx.set_current_event(Some(outcome));
        let flow = ctx.active_flow()?;
        match flow.try_transition(self, ctx)? {
            Some(o) => Ok(o),
            None => Err(ctx.no_matching_transition()),
        }
    }

    fn enter_end(
        &self,
        factory: Option<&dyn ViewFactory>,
        output_mapper: Option<&dyn OutputMapper>,
        ctx: &mut RequestContext,
    ) -> FlowResult<EnterOutcome> {
        let mut output = AttributeMap::new();
        if let Some(mapper) = output_mapper {
            mapper.map_output(ctx, &mut output)?;
        }
        let flow = ctx.active_flow()?;
        flow.end(ctx, &mut output)?;
        ctx.pop_session()?;
        let outcome = Event::new(flow.id(), self.id.clone());
        tracing::debug!(flow = flow.id(), outcome = self.id.as_str(), "session ended");
        if ctx.session_depth() == 0 {
            if let Some(factory) = factory {
                if !ctx.external().is_response_complete() {
                    let mut view = factory.get_view(ctx)?;
                    view.render(ctx)?;
                    ctx.external_mut().record_response_complete();
                }
            }
        }
        Ok(EnterOutcome::SessionEnded { outcome, output })
    }

    /// Resume a paused view state for a follow-up request. With no event
    /// this is a refresh and re-renders; with an event it routes through
    /// the state-local then flow-global transition sets.
    pub fn resume(&self, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        let data = match &self.kind {
            StateKind::View(data) => data,
            _ => {
                return Err(FlowExecutionError::IllegalState(format!(
                    "state '{}' is not a view state and cannot resume",
                    self.id
                )))
            }
        };
        if ctx.current_event().is_none() {
            self.render_view(data, ctx)?;
            return Ok(EnterOutcome::Paused);
        }
        let flow = ctx.active_flow()?;
        let transition = self
            .transitions
            .find_matching(ctx)
            .or_else(|| flow.global_transitions().find_matching(ctx));
        let Some(transition) = transition else {
            return Err(ctx.no_matching_transition());
        };
        if transition.is_internal() {
            if !transition.can_execute(ctx)? {
                return Err(ctx.no_matching_transition());
            }
            let redirect = data.redirect_in_same_state.unwrap_or_else(|| {
                !ctx.external().is_ajax_request() && ctx.always_redirect_on_pause()
            });
            if redirect {
                ctx.external_mut().request_flow_execution_redirect();
            } else {
                self.render_view(data, ctx)?;
            }
            return Ok(EnterOutcome::Paused);
        }
        match transition.execute(ctx, self)? {
            Some(outcome) => Ok(outcome),
            None => Err(ctx.no_matching_transition()),
        }
    }

    /// Build the view, render it, and retire flash scope for this request.
    fn render_view(&self, data: &ViewStateData, ctx: &mut RequestContext) -> FlowResult<()> {
        let mut view = data.factory.get_view(ctx)?;
        view.render(ctx)?;
        ctx.clear_flash()?;
        ctx.external_mut().record_response_complete();
        Ok(())
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("transitions", &self.transitions)
            .finish()
    }
}
