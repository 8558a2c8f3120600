use serde_json::Value;
use stepwise_model::{ModelMessage, ToolCallPart, ToolCallResult};

use super::Error;

/// A tool call parsed from a model response.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    /// The unique identifier for the tool call.
    pub id: String,
    /// Name of the called tool.
    pub tool_name: String,
    /// The validated input, or the best-effort parsed input of an invalid
    /// call.
    pub input: Value,
    /// Whether the call targets a dynamic tool, or a tool that could not be
    /// resolved at all.
    pub dynamic: bool,
    /// Whether the call failed to parse or validate. Invalid calls are never
    /// executed.
    pub invalid: bool,
    /// Why the call is invalid.
    pub error: Option<Error>,
}

impl ToolCall {
    pub(crate) fn to_part(&self) -> ToolCallPart {
        ToolCallPart {
            id: self.id.clone(),
            name: self.tool_name.clone(),
            input: self.input.clone(),
        }
    }
}

/// The outcome of one tool call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    /// Identifier of the tool call this result belongs to.
    pub tool_call_id: String,
    /// Name of the called tool.
    pub tool_name: String,
    /// The input the tool was called with.
    pub input: Value,
    /// The output of the tool, or why there is none.
    pub output: Result<Value, Error>,
    /// Same as [`ToolCall::dynamic`].
    pub dynamic: bool,
}

impl ToolResult {
    pub(crate) fn from_call(call: &ToolCall, output: Result<Value, Error>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
            output,
            dynamic: call.dynamic,
        }
    }

    /// Returns `true` if the tool call failed.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.output.is_err()
    }

    /// Converts the result into a tool message for the conversation.
    ///
    /// String outputs are passed verbatim, other values as JSON text.
    pub fn to_message(&self) -> ModelMessage {
        let (content, is_error) = match &self.output {
            Ok(Value::String(text)) => (text.clone(), false),
            Ok(value) => (value.to_string(), false),
            Err(err) => (err.reason().into_owned(), true),
        };
        ModelMessage::Tool(ToolCallResult {
            id: self.tool_call_id.clone(),
            name: self.tool_name.clone(),
            content,
            is_error,
        })
    }
}
