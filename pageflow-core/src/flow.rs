//! Flows
//!
//! A `Flow` is the immutable definition of one conversation: its states,
//! global transitions, declared variables, input/output mappers, and
//! exception handlers. Definitions are assembled once by `FlowBuilder`,
//! validated, and shared read-only across every execution.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::action::{Action, ActionList};
use crate::attributes::AttributeMap;
use crate::context::RequestContext;
use crate::errors::{FlowExecutionError, FlowResult};
use crate::event::Event;
use crate::expression::Expression;
use crate::handler::{ExceptionHandlerSet, FlowExecutionExceptionHandler};
use crate::mapping::{InputMapper, OutputMapper};
use crate::repository::FlowDefinitionRegistry;
use crate::state::{EnterOutcome, State, StateKind};
use crate::transition::{TargetStateResolver, Transition, TransitionSet};

/// A declared variable created when its owning scope opens. The value
/// factory runs against the request context at creation time.
pub struct Variable {
    pub name: String,
    pub value: Arc<dyn Expression>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Arc<dyn Expression>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// An immutable flow definition.
pub struct Flow {
    id: String,
    states: IndexMap<String, State>,
    start_state: Option<String>,
    global_transitions: TransitionSet,
    variables: Vec<Variable>,
    start_actions: ActionList,
    end_actions: ActionList,
    input_mapper: Option<Arc<dyn InputMapper>>,
    output_mapper: Option<Arc<dyn OutputMapper>>,
    exception_handlers: ExceptionHandlerSet,
    inline_flows: HashMap<String, Arc<Flow>>,
}

impl Flow {
    pub fn builder(id: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_state_id(&self) -> Option<&str> {
        self.start_state.as_deref()
    }

    pub fn global_transitions(&self) -> &TransitionSet {
        &self.global_transitions
    }

    pub fn state(&self, id: &str) -> FlowResult<&State> {
        self.states.get(id).ok_or_else(|| FlowExecutionError::NoSuchState {
            flow_id: self.id.clone(),
            state_id: id.to_string(),
        })
    }

    pub fn contains_state(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    /// Resolve a subflow definition: inline flows shadow the registry.
    pub fn resolve_subflow(
        &self,
        id: &str,
        registry: &FlowDefinitionRegistry,
    ) -> FlowResult<Arc<Flow>> {
        if let Some(inline) = self.inline_flows.get(id) {
            return Ok(inline.clone());
        }
        registry.lookup(id)
    }

    // ─── lifecycle ───

    /// Start a new session of this flow: create flow variables, map the
    /// caller's input, run start actions, enter the start state.
    pub fn start(&self, ctx: &mut RequestContext, input: AttributeMap) -> FlowResult<EnterOutcome> {
        match self.do_start(ctx, input) {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.recover(e, ctx),
        }
    }

    fn do_start(&self, ctx: &mut RequestContext, input: AttributeMap) -> FlowResult<EnterOutcome> {
        let start_id = self.start_state.clone().ok_or_else(|| {
            FlowExecutionError::IllegalState(format!("flow '{}' has no start state", self.id))
        })?;
        tracing::info!(flow = self.id.as_str(), "starting flow session");
        for variable in &self.variables {
            let value = variable.value.evaluate(ctx)?;
            ctx.flow_scope_mut()?.put(variable.name.clone(), value);
        }
        if let Some(mapper) = &self.input_mapper {
            mapper.map_input(&input, ctx)?;
        }
        self.start_actions.execute_all(ctx)?;
        self.state(&start_id)?.enter(ctx)
    }

    /// Route the context's current event from the current state.
    pub fn handle_event(&self, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        match self.do_handle_event(ctx) {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.recover(e, ctx),
        }
    }

    fn do_handle_event(&self, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        let state = self.require_current_state(ctx)?;
        if !state.is_transitionable() {
            return Err(FlowExecutionError::IllegalState(format!(
                "state '{}' of flow '{}' cannot handle events",
                state.id(),
                self.id
            )));
        }
        match self.try_transition(state, ctx)? {
            Some(outcome) => Ok(outcome),
            None => Err(ctx.no_matching_transition()),
        }
    }

    /// Re-enter the current state's resume behavior after the execution
    /// was reloaded: a refresh re-renders, an event routes transitions.
    pub fn resume(&self, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        match self.do_resume(ctx) {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.recover(e, ctx),
        }
    }

    fn do_resume(&self, ctx: &mut RequestContext) -> FlowResult<EnterOutcome> {
        let state = self.require_current_state(ctx)?;
        if matches!(state.kind(), StateKind::View(_)) {
            return state.resume(ctx);
        }
        if ctx.current_event().is_some() {
            return self.do_handle_event(ctx);
        }
        Err(FlowExecutionError::IllegalState(format!(
            "state '{}' of flow '{}' cannot refresh",
            state.id(),
            self.id
        )))
    }

    /// Deliver an ended child session's outcome to this flow's current
    /// state, which must be the subflow state that spawned it.
    pub fn resume_from_subflow(
        &self,
        ctx: &mut RequestContext,
        outcome: Event,
        output: AttributeMap,
    ) -> FlowResult<EnterOutcome> {
        match self.do_resume_from_subflow(ctx, outcome, output) {
            Ok(o) => Ok(o),
            Err(e) => self.recover(e, ctx),
        }
    }

    fn do_resume_from_subflow(
        &self,
        ctx: &mut RequestContext,
        outcome: Event,
        output: AttributeMap,
    ) -> FlowResult<EnterOutcome> {
        let state = self.require_current_state(ctx)?;
        state.handle_subflow_outcome(outcome, output, ctx)
    }

    /// End the active session: run end actions, map output, and destroy
    /// the declared flow variables.
    pub fn end(&self, ctx: &mut RequestContext, output: &mut AttributeMap) -> FlowResult<()> {
        tracing::info!(flow = self.id.as_str(), "ending flow session");
        self.end_actions.execute_all(ctx)?;
        if let Some(mapper) = &self.output_mapper {
            mapper.map_output(ctx, output)?;
        }
        for variable in &self.variables {
            ctx.flow_scope_mut()?.remove(&variable.name);
        }
        Ok(())
    }

    /// Find and execute the first matching transition out of `state`,
    /// searching the state-local set then the global set. `Ok(None)` means
    /// nothing matched. A matched transition whose gating chain vetoes is
    /// terminal for the event: no later transition is attempted.
    pub fn try_transition(
        &self,
        state: &State,
        ctx: &mut RequestContext,
    ) -> FlowResult<Option<EnterOutcome>> {
        let transition = state
            .transitions()
            .find_matching(ctx)
            .or_else(|| self.global_transitions.find_matching(ctx));
        let Some(transition) = transition else {
            return Ok(None);
        };
        match transition.execute(ctx, state)? {
            Some(outcome) => Ok(Some(outcome)),
            None => Err(ctx.no_matching_transition()),
        }
    }

    fn require_current_state(&self, ctx: &RequestContext) -> FlowResult<&State> {
        let state_id = ctx.current_state_id().ok_or_else(|| {
            FlowExecutionError::IllegalState(format!(
                "flow '{}' received a request with no current state",
                self.id
            ))
        })?;
        self.states.get(&state_id).ok_or_else(|| {
            FlowExecutionError::IllegalState(format!(
                "current state '{}' does not belong to flow '{}'",
                state_id, self.id
            ))
        })
    }

    /// Offer an execution error to the current state's handler set, then
    /// this flow's. Contract violations are never offered and unhandled
    /// errors propagate unchanged.
    fn recover(
        &self,
        error: FlowExecutionError,
        ctx: &mut RequestContext,
    ) -> FlowResult<EnterOutcome> {
        if error.is_contract_violation() {
            return Err(error);
        }
        // A failed subflow spawn can leave child sessions stacked above
        // this flow's own. Handler targets resolve against this flow, so
        // those sessions are discarded before any handler runs.
        while let Ok(active) = ctx.active_flow() {
            if std::ptr::eq(Arc::as_ptr(&active), self) {
                break;
            }
            ctx.pop_session()?;
        }
        if let Some(state_id) = ctx.current_state_id() {
            if let Some(state) = self.states.get(&state_id) {
                if let Some(outcome) = state.exception_handlers().handle(&error, ctx)? {
                    return Ok(outcome);
                }
            }
        }
        if let Some(outcome) = self.exception_handlers.handle(&error, ctx)? {
            return Ok(outcome);
        }
        Err(error)
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("start_state", &self.start_state)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Assembles and validates a `Flow`.
pub struct FlowBuilder {
    id: String,
    states: IndexMap<String, State>,
    duplicate_states: Vec<String>,
    start_state: Option<String>,
    global_transitions: TransitionSet,
    variables: Vec<Variable>,
    start_actions: ActionList,
    end_actions: ActionList,
    input_mapper: Option<Arc<dyn InputMapper>>,
    output_mapper: Option<Arc<dyn OutputMapper>>,
    exception_handlers: ExceptionHandlerSet,
    inline_flows: HashMap<String, Arc<Flow>>,
}

impl FlowBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            states: IndexMap::new(),
            duplicate_states: Vec::new(),
            start_state: None,
            global_transitions: TransitionSet::new(),
            variables: Vec::new(),
            start_actions: ActionList::new(),
            end_actions: ActionList::new(),
            input_mapper: None,
            output_mapper: None,
            exception_handlers: ExceptionHandlerSet::new(),
            inline_flows: HashMap::new(),
        }
    }

    /// Add a state. The first state added becomes the start state unless
    /// one is set explicitly.
    pub fn state(mut self, state: State) -> Self {
        if self.start_state.is_none() {
            self.start_state = Some(state.id().to_string());
        }
        let id = state.id().to_string();
        if self.states.insert(id.clone(), state).is_some() {
            self.duplicate_states.push(id);
        }
        self
    }

    pub fn start_state(mut self, id: impl Into<String>) -> Self {
        self.start_state = Some(id.into());
        self
    }

    pub fn global_transition(mut self, transition: Transition) -> Self {
        self.global_transitions.push(transition);
        self
    }

    pub fn variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn start_action(mut self, action: Arc<dyn Action>) -> Self {
        self.start_actions.push(action);
        self
    }

    pub fn end_action(mut self, action: Arc<dyn Action>) -> Self {
        self.end_actions.push(action);
        self
    }

    pub fn input_mapper(mut self, mapper: Arc<dyn InputMapper>) -> Self {
        self.input_mapper = Some(mapper);
        self
    }

    pub fn output_mapper(mut self, mapper: Arc<dyn OutputMapper>) -> Self {
        self.output_mapper = Some(mapper);
        self
    }

    pub fn exception_handler(mut self, handler: Box<dyn FlowExecutionExceptionHandler>) -> Self {
        self.exception_handlers.push(handler);
        self
    }

    /// Register an inline flow, resolvable by subflow states of this flow
    /// ahead of the execution-wide registry.
    pub fn inline_flow(mut self, flow: Flow) -> Self {
        self.inline_flows.insert(flow.id.clone(), Arc::new(flow));
        self
    }

    /// Validate and produce the flow definition.
    pub fn build(self) -> FlowResult<Flow> {
        if let Some(dup) = self.duplicate_states.first() {
            return Err(FlowExecutionError::Definition(format!(
                "flow '{}' defines state '{}' more than once",
                self.id, dup
            )));
        }
        if let Some(start) = &self.start_state {
            if !self.states.contains_key(start) {
                return Err(FlowExecutionError::Definition(format!(
                    "flow '{}' start state '{}' is not defined",
                    self.id, start
                )));
            }
        }
        let all_targets = self
            .states
            .values()
            .flat_map(|s| s.transitions().iter())
            .chain(self.global_transitions.iter());
        for transition in all_targets {
            if let Some(TargetStateResolver::Static(target)) = transition.target() {
                if !self.states.contains_key(target) {
                    return Err(FlowExecutionError::Definition(format!(
                        "flow '{}' has a transition targeting unknown state '{}'",
                        self.id, target
                    )));
                }
            }
        }
        Ok(Flow {
            id: self.id,
            states: self.states,
            start_state: self.start_state,
            global_transitions: self.global_transitions,
            variables: self.variables,
            start_actions: self.start_actions,
            end_actions: self.end_actions,
            input_mapper: self.input_mapper,
            output_mapper: self.output_mapper,
            exception_handlers: self.exception_handlers,
            inline_flows: self.inline_flows,
        })
    }
}
