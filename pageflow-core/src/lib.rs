//! pageflow-core: a server-side conversational flow engine.
//!
//! Flow definitions are immutable state machines (action, view, decision,
//! subflow, and end states wired by transitions) built once and shared
//! across executions. A `FlowExecution` runs one conversation over a
//! definition: it pauses whenever a view state renders, serializes to a
//! snapshot between requests, and resumes when the next event arrives.
//!
//! The engine is synchronous and render-technology agnostic; views,
//! expressions, actions, and persistence are pluggable trait seams.

pub mod action;
pub mod attributes;
pub mod context;
pub mod errors;
pub mod event;
pub mod execution;
pub mod expression;
pub mod flow;
pub mod handler;
pub mod mapping;
pub mod repository;
pub mod state;
pub mod transition;
pub mod view;

pub use action::{Action, ActionList, ActionRegistry, ActionResult, FnAction};
pub use attributes::{AttributeMap, ScopeType};
pub use context::RequestContext;
pub use errors::{FlowExecutionError, FlowResult};
pub use event::Event;
pub use execution::{
    FlowExecution, FlowExecutionOutcome, FlowExecutionStatus, FlowSession,
};
pub use expression::{
    EventAttributeExpression, EventIdExpression, Expression, ScopeAttributeExpression,
    StaticExpression,
};
pub use flow::{Flow, FlowBuilder, Variable};
pub use handler::{
    ExceptionHandlerSet, FlowExecutionExceptionHandler, TransitionExecutingHandler,
};
pub use mapping::{
    DefaultInputMapper, DefaultOutputMapper, DefaultSubflowMapper, InputMapper, Mapping,
    OutputMapper, OutputMapping, SubflowAttributeMapper,
};
pub use repository::{
    FlowDefinitionRegistry, FlowExecutionRepository, FlowExecutionSnapshot,
    InMemoryExecutionRepository, SessionSnapshot,
};
pub use state::{EnterOutcome, State, StateKind, ViewStateData};
pub use transition::{TargetStateResolver, Transition, TransitionCriteria, TransitionSet};
pub use view::{ExternalContext, MockExternalContext, StubViewFactory, View, ViewFactory};
