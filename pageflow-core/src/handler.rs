//! Exception handling
//!
//! Handler sets give flows and states a chance to recover from execution
//! errors by steering the machine somewhere safe. Dispatch is strictly
//! ordered: the first handler claiming an error owns it, later handlers
//! never see it.

use crate::context::RequestContext;
use crate::errors::{FlowExecutionError, FlowResult};
use crate::state::EnterOutcome;
use crate::transition::Transition;

/// Recovers from a flow execution error, typically by transitioning to a
/// designated error state.
pub trait FlowExecutionExceptionHandler: Send + Sync {
    /// Whether this handler claims the error.
    fn can_handle(&self, error: &FlowExecutionError) -> bool;

    /// Recover. Returning `Err` means recovery itself failed and the
    /// original request fails.
    fn handle(
        &self,
        error: &FlowExecutionError,
        ctx: &mut RequestContext,
    ) -> FlowResult<EnterOutcome>;
}

/// An ordered chain of exception handlers.
#[derive(Default)]
pub struct ExceptionHandlerSet(Vec<Box<dyn FlowExecutionExceptionHandler>>);

impl ExceptionHandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: Box<dyn FlowExecutionExceptionHandler>) {
        self.0.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Offer the error to each handler in order. `Ok(None)` means no
    /// handler claimed it.
    pub fn handle(
        &self,
        error: &FlowExecutionError,
        ctx: &mut RequestContext,
    ) -> FlowResult<Option<EnterOutcome>> {
        for handler in &self.0 {
            if handler.can_handle(error) {
                tracing::debug!(error = %error, "exception handler claimed error");
                return handler.handle(error, ctx).map(Some);
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for ExceptionHandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ExceptionHandlerSet")
            .field(&self.0.len())
            .finish()
    }
}

/// A handler that recovers by transitioning the current session to a fixed
/// target state when its matcher accepts the error.
pub struct TransitionExecutingHandler {
    matcher: Box<dyn Fn(&FlowExecutionError) -> bool + Send + Sync>,
    target: String,
}

impl TransitionExecutingHandler {
    pub fn new(
        matcher: impl Fn(&FlowExecutionError) -> bool + Send + Sync + 'static,
        target: impl Into<String>,
    ) -> Self {
        Self {
            matcher: Box::new(matcher),
            target: target.into(),
        }
    }
}

impl FlowExecutionExceptionHandler for TransitionExecutingHandler {
    fn can_handle(&self, error: &FlowExecutionError) -> bool {
        (self.matcher)(error)
    }

    fn handle(
        &self,
        error: &FlowExecutionError,
        ctx: &mut RequestContext,
    ) -> FlowResult<EnterOutcome> {
        tracing::info!(
            error = %error,
            target = self.target.as_str(),
            "recovering by transition"
        );
        let flow = ctx.active_flow()?;
        let recovery = Transition::always().to(self.target.clone());
        // Recovery may fire before any state was entered (a failed flow
        // start); enter the target directly in that case.
        match ctx.current_state_id() {
            Some(state_id) => {
                let source = flow.state(&state_id)?;
                recovery
                    .execute(ctx, source)?
                    .ok_or_else(|| {
                        FlowExecutionError::IllegalState(
                            "recovery transition was vetoed".to_string(),
                        )
                    })
            }
            None => flow.state(&self.target)?.enter(ctx),
        }
    }
}
