//! Tool call supports.
//!
//! A step's tool calls go through three stages. They are parsed against the
//! step's active tools (with an optional repair attempt), the valid ones are
//! executed concurrently, and every call ends up with exactly one
//! [`ToolResult`], in the order the model produced the calls.

mod call;
mod dispatch;
mod error;
mod object;
mod parse;
mod registry;

use std::sync::Arc;

use futures_util::Stream;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stepwise_model::ModelMessage;
use tokio_util::sync::CancellationToken;

use crate::BoxError;
pub use call::{ToolCall, ToolResult};
pub(crate) use dispatch::{DispatchOptions, dispatch};
pub use error::{Error, ErrorKind};
pub use parse::{RepairInput, RepairToolCall};
pub(crate) use parse::{lenient_input, parse_tool_calls};
pub use registry::{RegisteredTool, ToolRegistry};
pub(crate) use registry::ToolSet;

/// Information available to a tool while it runs.
#[derive(Clone, Debug)]
pub struct ToolCallContext {
    /// Identifier of the tool call being executed.
    pub tool_call_id: String,
    /// The messages that were sent to the model in this step.
    pub messages: Arc<[ModelMessage]>,
    /// The caller-supplied context of the run.
    pub context: Option<Arc<Value>>,
    /// Cancelled when the run is cancelled.
    ///
    /// The engine stops waiting for a tool once this fires; long running
    /// tools may watch it to stop their own work early.
    pub cancellation: CancellationToken,
}

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as the working directory or the
/// current user. To do this, make the context an immutable state of the tool,
/// which can be set during initialization, and copy it when executing. Per-run
/// information is available through [`ToolCallContext`].
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned + Send + 'static;

    /// The type of output that the tool produces.
    type Output: Serialize + Send + 'static;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Validates the raw input after it passed the schema check, and
    /// optionally normalizes it.
    ///
    /// This runs when the tool call is parsed, so a rejected input never
    /// reaches [`Tool::execute`].
    #[inline]
    fn validate_input(&self, input: Value) -> Result<Value, Error> {
        Ok(input)
    }

    /// Invoked with the validated input right before execution.
    ///
    /// Errors are logged and otherwise ignored.
    #[inline]
    fn on_input_available(
        &self,
        _input: &Value,
        _ctx: &ToolCallContext,
    ) -> impl Future<Output = Result<(), BoxError>> + Send + 'static {
        std::future::ready(Ok(()))
    }

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
        ctx: ToolCallContext,
    ) -> impl Future<Output = Result<Self::Output, Error>> + Send + 'static;
}

/// A tool whose execution yields a series of outputs, e.g. progress
/// updates. Only the last output becomes the tool result.
pub trait StreamingTool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned + Send + 'static;

    /// The type of output that the tool produces.
    type Output: Serialize + Send + 'static;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// See [`Tool::validate_input`].
    #[inline]
    fn validate_input(&self, input: Value) -> Result<Value, Error> {
        Ok(input)
    }

    /// See [`Tool::on_input_available`].
    #[inline]
    fn on_input_available(
        &self,
        _input: &Value,
        _ctx: &ToolCallContext,
    ) -> impl Future<Output = Result<(), BoxError>> + Send + 'static {
        std::future::ready(Ok(()))
    }

    /// Executes the tool with the given input.
    ///
    /// An error item ends the execution with that error.
    fn execute(
        &self,
        input: Self::Input,
        ctx: ToolCallContext,
    ) -> impl Stream<Item = Result<Self::Output, Error>> + Send + 'static;
}

/// A tool with untyped input and output.
///
/// Calls to dynamic tools are marked as `dynamic` in the step results. Use
/// this for tools whose shape is only known at runtime, like tools
/// discovered from a remote server.
pub trait DynamicTool: Send + Sync + 'static {
    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    fn execute(
        &self,
        input: Value,
        ctx: ToolCallContext,
    ) -> impl Future<Output = Result<Value, Error>> + Send + 'static;
}

/// Derives a parameter schema from a Rust type.
#[inline]
pub fn schema_for<T: JsonSchema>() -> Value {
    schemars::schema_for!(T).to_value()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct ForecastInput {
        city: String,
        days: Option<u32>,
    }

    #[test]
    fn test_schema_for() {
        let schema = schema_for::<ForecastInput>();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["city"]));
        assert_eq!(schema["properties"]["city"]["type"], "string");
    }
}
