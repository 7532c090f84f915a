//! Attribute mapping
//!
//! Declarative movement of attributes across boundaries: caller input into
//! a starting flow, flow state out to the caller at end, and both
//! directions around a subflow. Each rule names its source and target; a
//! rule marked required fails the whole mapping step when its source is
//! absent or null.

use std::sync::Arc;

use serde_json::Value;

use crate::attributes::AttributeMap;
use crate::context::RequestContext;
use crate::errors::{FlowExecutionError, FlowResult};
use crate::expression::Expression;

/// A rule pulling a named key out of a source map and assigning it through
/// an expression into the current request.
pub struct Mapping {
    pub source: String,
    pub target: Arc<dyn Expression>,
    pub required: bool,
}

impl Mapping {
    pub fn new(source: impl Into<String>, target: Arc<dyn Expression>) -> Self {
        Self {
            source: source.into(),
            target,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A rule evaluating an expression against the current request and writing
/// the value under a named key in a target map.
pub struct OutputMapping {
    pub source: Arc<dyn Expression>,
    pub target: String,
    pub required: bool,
}

impl OutputMapping {
    pub fn new(source: Arc<dyn Expression>, target: impl Into<String>) -> Self {
        Self {
            source,
            target: target.into(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Maps caller-provided input into a freshly started flow session.
pub trait InputMapper: Send + Sync {
    fn map_input(&self, input: &AttributeMap, ctx: &mut RequestContext) -> FlowResult<()>;
}

/// Maps flow state out into the output returned to the caller at flow end.
pub trait OutputMapper: Send + Sync {
    fn map_output(&self, ctx: &RequestContext, output: &mut AttributeMap) -> FlowResult<()>;
}

/// Maps attributes down into a spawning subflow and back up when it ends.
pub trait SubflowAttributeMapper: Send + Sync {
    /// Build the input map handed to the subflow at spawn.
    fn map_subflow_input(&self, ctx: &RequestContext) -> FlowResult<AttributeMap>;

    /// Apply the ended subflow's output to the resuming parent.
    fn map_subflow_output(
        &self,
        output: &AttributeMap,
        ctx: &mut RequestContext,
    ) -> FlowResult<()>;
}

fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Rule-list input mapper. Required rules with a missing or null source
/// fail the step; optional ones are skipped.
#[derive(Default)]
pub struct DefaultInputMapper {
    mappings: Vec<Mapping>,
}

impl DefaultInputMapper {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        Self { mappings }
    }
}

impl InputMapper for DefaultInputMapper {
    fn map_input(&self, input: &AttributeMap, ctx: &mut RequestContext) -> FlowResult<()> {
        for mapping in &self.mappings {
            let value = input.get(&mapping.source);
            if is_missing(value) {
                if mapping.required {
                    return Err(FlowExecutionError::Mapping(format!(
                        "required input '{}' is missing",
                        mapping.source
                    )));
                }
                continue;
            }
            let value = value.cloned().unwrap_or(Value::Null);
            mapping.target.assign(ctx, value)?;
        }
        Ok(())
    }
}

/// Rule-list output mapper, the mirror of `DefaultInputMapper`.
#[derive(Default)]
pub struct DefaultOutputMapper {
    mappings: Vec<OutputMapping>,
}

impl DefaultOutputMapper {
    pub fn new(mappings: Vec<OutputMapping>) -> Self {
        Self { mappings }
    }
}

impl OutputMapper for DefaultOutputMapper {
    fn map_output(&self, ctx: &RequestContext, output: &mut AttributeMap) -> FlowResult<()> {
        for mapping in &self.mappings {
            let value = mapping.source.evaluate(ctx)?;
            if value.is_null() {
                if mapping.required {
                    return Err(FlowExecutionError::Mapping(format!(
                        "required output '{}' evaluated to null",
                        mapping.source.expression_string()
                    )));
                }
                continue;
            }
            output.put(mapping.target.clone(), value);
        }
        Ok(())
    }
}

/// Rule-list subflow mapper: output-style rules feed the child's input,
/// input-style rules apply the child's output back to the parent.
#[derive(Default)]
pub struct DefaultSubflowMapper {
    input_mappings: Vec<OutputMapping>,
    output_mappings: Vec<Mapping>,
}

impl DefaultSubflowMapper {
    pub fn new(input_mappings: Vec<OutputMapping>, output_mappings: Vec<Mapping>) -> Self {
        Self {
            input_mappings,
            output_mappings,
        }
    }
}

impl SubflowAttributeMapper for DefaultSubflowMapper {
    fn map_subflow_input(&self, ctx: &RequestContext) -> FlowResult<AttributeMap> {
        let mut input = AttributeMap::new();
        for mapping in &self.input_mappings {
            let value = mapping.source.evaluate(ctx)?;
            if value.is_null() {
                if mapping.required {
                    return Err(FlowExecutionError::Mapping(format!(
                        "required subflow input '{}' evaluated to null",
                        mapping.source.expression_string()
                    )));
                }
                continue;
            }
            input.put(mapping.target.clone(), value);
        }
        Ok(input)
    }

    fn map_subflow_output(
        &self,
        output: &AttributeMap,
        ctx: &mut RequestContext,
    ) -> FlowResult<()> {
        for mapping in &self.output_mappings {
            let value = output.get(&mapping.source);
            if is_missing(value) {
                if mapping.required {
                    return Err(FlowExecutionError::Mapping(format!(
                        "required subflow output '{}' is missing",
                        mapping.source
                    )));
                }
                continue;
            }
            let value = value.cloned().unwrap_or(Value::Null);
            mapping.target.assign(ctx, value)?;
        }
        Ok(())
    }
}
