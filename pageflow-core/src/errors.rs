//! Flow execution error taxonomy
//!
//! Typed errors raised by the state machine. Collaborator traits (views,
//! external contexts, repositories) return `anyhow::Result` at the seam;
//! the engine wraps those failures into `FlowExecutionError::Render` when
//! they cross back in.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type FlowResult<T> = std::result::Result<T, FlowExecutionError>;

/// Errors raised while executing a flow.
#[derive(Debug, Error)]
pub enum FlowExecutionError {
    /// An event or state entry produced no satisfiable transition.
    #[error("no matching transition in flow '{flow_id}', state '{state_id}', for event '{event_id}'")]
    NoMatchingTransition {
        flow_id: String,
        state_id: String,
        event_id: String,
    },

    /// An action raised a failure while executing.
    #[error("action '{action}' failed in flow '{flow_id}', state '{}': {message}", state_id.as_deref().unwrap_or("<none>"))]
    ActionExecution {
        flow_id: String,
        state_id: Option<String>,
        action: String,
        message: String,
    },

    #[error("no state '{state_id}' in flow '{flow_id}'")]
    NoSuchState { flow_id: String, state_id: String },

    #[error("no flow definition '{0}' in registry")]
    NoSuchFlow(String),

    #[error("attribute mapping failed: {0}")]
    Mapping(String),

    #[error("expression failed: {0}")]
    Expression(String),

    #[error("required attribute '{0}' is missing")]
    MissingAttribute(String),

    /// A view factory, view render, or external-context call failed.
    #[error("render failed: {0}")]
    Render(#[from] anyhow::Error),

    /// Programming-contract violation. Never offered to exception handlers
    /// and never retried.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A flow definition failed validation at build time.
    #[error("invalid flow definition: {0}")]
    Definition(String),
}

impl FlowExecutionError {
    /// Contract violations bypass exception-handler dispatch entirely.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::IllegalState(_) | Self::Definition(_))
    }
}
