//! Expressions
//!
//! The engine never interprets strings itself. Everywhere a flow definition
//! needs a computed value, a transition condition, or an assignment target,
//! it holds an opaque `Expression` collaborator. The built-in
//! implementations cover the common cases (constants, scope attributes,
//! event payload lookups); host applications plug in richer languages by
//! implementing the trait.

use serde_json::Value;

use crate::attributes::ScopeType;
use crate::context::RequestContext;
use crate::errors::{FlowExecutionError, FlowResult};

/// A value computation against the current request.
///
/// `assign` has a default non-assignable implementation; only expressions
/// that denote a settable location override it.
pub trait Expression: Send + Sync {
    /// Evaluate the expression against the request context.
    fn evaluate(&self, ctx: &RequestContext) -> FlowResult<Value>;

    /// Assign a value to the location this expression denotes.
    fn assign(&self, _ctx: &mut RequestContext, _value: Value) -> FlowResult<()> {
        Err(FlowExecutionError::Expression(format!(
            "expression '{}' is not assignable",
            self.expression_string()
        )))
    }

    /// The definition-time form of the expression, for diagnostics.
    fn expression_string(&self) -> String;
}

/// A constant value.
pub struct StaticExpression(pub Value);

impl Expression for StaticExpression {
    fn evaluate(&self, _ctx: &RequestContext) -> FlowResult<Value> {
        Ok(self.0.clone())
    }

    fn expression_string(&self) -> String {
        self.0.to_string()
    }
}

/// Reads or writes a named attribute in a specific scope. Evaluates to
/// `Value::Null` when the attribute is absent.
pub struct ScopeAttributeExpression {
    scope: ScopeType,
    name: String,
}

impl ScopeAttributeExpression {
    pub fn new(scope: ScopeType, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

impl Expression for ScopeAttributeExpression {
    fn evaluate(&self, ctx: &RequestContext) -> FlowResult<Value> {
        Ok(ctx
            .scope(self.scope)?
            .get(&self.name)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn assign(&self, ctx: &mut RequestContext, value: Value) -> FlowResult<()> {
        ctx.scope_mut(self.scope)?.put(self.name.clone(), value);
        Ok(())
    }

    fn expression_string(&self) -> String {
        format!("{}.{}", self.scope, self.name)
    }
}

/// Reads a named attribute from the current event's payload. Evaluates to
/// `Value::Null` when there is no current event or no such attribute.
pub struct EventAttributeExpression(pub String);

impl Expression for EventAttributeExpression {
    fn evaluate(&self, ctx: &RequestContext) -> FlowResult<Value> {
        Ok(ctx
            .current_event()
            .and_then(|e| e.attributes().get(&self.0))
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn expression_string(&self) -> String {
        format!("event.{}", self.0)
    }
}

/// Evaluates to the current event's id, or `Value::Null` without one.
pub struct EventIdExpression;

impl Expression for EventIdExpression {
    fn evaluate(&self, ctx: &RequestContext) -> FlowResult<Value> {
        Ok(ctx
            .current_event()
            .map(|e| Value::String(e.id().to_string()))
            .unwrap_or(Value::Null))
    }

    fn expression_string(&self) -> String {
        "event.id".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::attributes::AttributeMap;
    use crate::event::Event;
    use crate::execution::FlowExecution;
    use crate::flow::Flow;
    use crate::repository::FlowDefinitionRegistry;
    use crate::state::State;
    use crate::view::MockExternalContext;

    fn make_execution() -> FlowExecution {
        let mut registry = FlowDefinitionRegistry::new();
        let root = registry.register(
            Flow::builder("test")
                .state(State::end("done"))
                .build()
                .unwrap(),
        );
        let mut exec = FlowExecution::new(root.clone(), Arc::new(registry));
        exec.push_session(root);
        exec
    }

    #[test]
    fn scope_attribute_reads_and_writes_its_scope() {
        let mut exec = make_execution();
        let mut external = MockExternalContext::new();
        let mut ctx = RequestContext::new(&mut exec, &mut external, None);

        let expr = ScopeAttributeExpression::new(ScopeType::Flow, "total");
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Null);

        expr.assign(&mut ctx, json!(12)).unwrap();
        assert_eq!(expr.evaluate(&ctx).unwrap(), json!(12));
        assert_eq!(ctx.flow_scope().unwrap().get("total"), Some(&json!(12)));
    }

    #[test]
    fn static_expression_is_not_assignable() {
        let mut exec = make_execution();
        let mut external = MockExternalContext::new();
        let mut ctx = RequestContext::new(&mut exec, &mut external, None);

        let expr = StaticExpression(json!("fixed"));
        assert_eq!(expr.evaluate(&ctx).unwrap(), json!("fixed"));
        let err = expr.assign(&mut ctx, json!(1)).unwrap_err();
        assert!(matches!(err, FlowExecutionError::Expression(_)));
    }

    #[test]
    fn event_expressions_read_the_current_event() {
        let mut exec = make_execution();
        let mut external = MockExternalContext::new();
        let mut payload = AttributeMap::new();
        payload.put("orderId", 7);
        let event = Event::with_attributes("form", "submit", payload);
        let ctx = RequestContext::new(&mut exec, &mut external, Some(event));

        assert_eq!(EventIdExpression.evaluate(&ctx).unwrap(), json!("submit"));
        assert_eq!(
            EventAttributeExpression("orderId".into()).evaluate(&ctx).unwrap(),
            json!(7)
        );
        assert_eq!(
            EventAttributeExpression("missing".into()).evaluate(&ctx).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn event_expressions_are_null_without_an_event() {
        let mut exec = make_execution();
        let mut external = MockExternalContext::new();
        let ctx = RequestContext::new(&mut exec, &mut external, None);

        assert_eq!(EventIdExpression.evaluate(&ctx).unwrap(), Value::Null);
        assert_eq!(
            EventAttributeExpression("anything".into()).evaluate(&ctx).unwrap(),
            Value::Null
        );
    }
}
