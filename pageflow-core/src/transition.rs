//! Transitions
//!
//! A transition links a matching event to a target state, optionally gated
//! by a chain of actions that can veto it. Criteria select the transition;
//! the gating chain decides whether it fires; target resolution happens
//! only after the gate passes.

use std::sync::Arc;

use crate::action::{Action, ActionList};
use crate::context::RequestContext;
use crate::errors::FlowResult;
use crate::expression::Expression;
use crate::state::{EnterOutcome, State};

/// When a transition is eligible for the current request.
#[derive(Clone)]
pub enum TransitionCriteria {
    /// Always eligible, regardless of event.
    Always,
    /// Eligible when the current event id equals this id.
    EventId(String),
    /// Eligible whenever any event is present.
    Wildcard,
    /// Eligible when the expression evaluates to boolean true. Evaluation
    /// failures count as no match.
    Expression(Arc<dyn Expression>),
}

impl TransitionCriteria {
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        match self {
            Self::Always => true,
            Self::EventId(id) => ctx.event_id().map(|e| e == id).unwrap_or(false),
            Self::Wildcard => ctx.current_event().is_some(),
            Self::Expression(expr) => match expr.evaluate(ctx) {
                Ok(value) => value.as_bool().unwrap_or(false),
                Err(e) => {
                    tracing::warn!(
                        expression = %expr.expression_string(),
                        error = %e,
                        "transition criteria evaluation failed, treating as no match"
                    );
                    false
                }
            },
        }
    }
}

impl std::fmt::Debug for TransitionCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::EventId(id) => write!(f, "EventId({id:?})"),
            Self::Wildcard => write!(f, "Wildcard"),
            Self::Expression(e) => write!(f, "Expression({:?})", e.expression_string()),
        }
    }
}

/// How a fired transition picks its target state.
#[derive(Clone)]
pub enum TargetStateResolver {
    /// A fixed state id, resolvable at definition time.
    Static(String),
    /// A state id computed per request.
    Expression(Arc<dyn Expression>),
}

impl TargetStateResolver {
    pub fn resolve(&self, ctx: &RequestContext) -> FlowResult<String> {
        match self {
            Self::Static(id) => Ok(id.clone()),
            Self::Expression(expr) => {
                let value = expr.evaluate(ctx)?;
                value.as_str().map(str::to_string).ok_or_else(|| {
                    crate::errors::FlowExecutionError::Expression(format!(
                        "target expression '{}' did not yield a state id",
                        expr.expression_string()
                    ))
                })
            }
        }
    }
}

/// An eligible move from one state to another (or within one state, when
/// no target is set).
pub struct Transition {
    criteria: TransitionCriteria,
    actions: ActionList,
    target: Option<TargetStateResolver>,
}

impl Transition {
    /// A transition matching a specific event id.
    pub fn on(event_id: impl Into<String>) -> Self {
        Self::when(TransitionCriteria::EventId(event_id.into()))
    }

    /// A transition that always matches.
    pub fn always() -> Self {
        Self::when(TransitionCriteria::Always)
    }

    pub fn when(criteria: TransitionCriteria) -> Self {
        Self {
            criteria,
            actions: ActionList::new(),
            target: None,
        }
    }

    /// Target a fixed state id.
    pub fn to(mut self, state_id: impl Into<String>) -> Self {
        self.target = Some(TargetStateResolver::Static(state_id.into()));
        self
    }

    /// Target a state id computed at request time.
    pub fn to_expression(mut self, expr: Arc<dyn Expression>) -> Self {
        self.target = Some(TargetStateResolver::Expression(expr));
        self
    }

    /// Append a gating action. Gating actions run in order when the
    /// transition is selected; an error result from any of them vetoes it.
    pub fn with_action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    /// A transition with no target stays in its source state.
    pub fn is_internal(&self) -> bool {
        self.target.is_none()
    }

    pub fn criteria(&self) -> &TransitionCriteria {
        &self.criteria
    }

    pub fn target(&self) -> Option<&TargetStateResolver> {
        self.target.as_ref()
    }

    pub fn matches(&self, ctx: &RequestContext) -> bool {
        self.criteria.matches(ctx)
    }

    /// Run the gating chain. `Ok(false)` means a gating action reported an
    /// error result and vetoed the transition; the machine stays put.
    pub fn can_execute(&self, ctx: &mut RequestContext) -> FlowResult<bool> {
        for action in self.actions.iter() {
            let result = action
                .execute(ctx)
                .map_err(|e| ctx.action_error(action.name(), e))?;
            if result.is_error() {
                tracing::debug!(
                    action = action.name(),
                    "gating action vetoed transition"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Execute this transition out of `source`. Returns `Ok(None)` when the
    /// gating chain vetoed it, otherwise the outcome of entering the
    /// target state.
    pub fn execute(
        &self,
        ctx: &mut RequestContext,
        source: &State,
    ) -> FlowResult<Option<EnterOutcome>> {
        if !self.can_execute(ctx)? {
            return Ok(None);
        }
        let target = match &self.target {
            None => return Ok(Some(EnterOutcome::Paused)),
            Some(resolver) => resolver.resolve(ctx)?,
        };
        let flow = ctx.active_flow()?;
        let target_state = flow.state(&target)?;
        tracing::debug!(
            from = source.id(),
            to = target.as_str(),
            flow = flow.id(),
            "executing transition"
        );
        source.exit(ctx)?;
        target_state.enter(ctx).map(Some)
    }
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("criteria", &self.criteria)
            .field(
                "target",
                &match &self.target {
                    None => "<internal>".to_string(),
                    Some(TargetStateResolver::Static(id)) => id.clone(),
                    Some(TargetStateResolver::Expression(e)) => e.expression_string(),
                },
            )
            .finish()
    }
}

/// An ordered set of transitions; matching is strictly first-match-wins.
#[derive(Debug, Default)]
pub struct TransitionSet(Vec<Transition>);

impl TransitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transition: Transition) {
        self.0.push(transition);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.0.iter()
    }

    /// The first transition whose criteria match the current request, if
    /// any. Gating chains are not consulted here; a later veto does not
    /// reopen the search.
    pub fn find_matching(&self, ctx: &RequestContext) -> Option<&Transition> {
        self.0.iter().find(|t| t.matches(ctx))
    }
}

impl FromIterator<Transition> for TransitionSet {
    fn from_iter<T: IntoIterator<Item = Transition>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
