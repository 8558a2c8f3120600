//! Results of individual steps.

use stepwise_model::{
    ContentPart, GeneratedFile, ModelFinishReason, ModelMessage,
    OpaqueMessage, Source, Usage,
};

use crate::tool::{ToolCall, ToolResult};

/// The record of one completed step.
///
/// Steps are numbered from zero. A step result never changes once it's
/// recorded.
#[derive(Clone, Debug)]
pub struct StepResult {
    /// Zero-based index of this step in the run.
    pub step_number: usize,
    /// Identifier of the model that served this step.
    pub model_id: String,
    /// Ordered content of the assistant message.
    pub content: Vec<ContentPart>,
    /// Text of the assistant message.
    pub text: String,
    /// Reasoning text, if the model produced any.
    pub reasoning_text: Option<String>,
    /// Tool calls parsed from the response, valid or not.
    pub tool_calls: Vec<ToolCall>,
    /// One result per tool call, in the same order.
    pub tool_results: Vec<ToolResult>,
    /// Files generated by the model.
    pub files: Vec<GeneratedFile>,
    /// Sources cited by the model.
    pub sources: Vec<Source>,
    /// Why the model stopped generating.
    pub finish_reason: ModelFinishReason,
    /// Token usage of this step.
    pub usage: Usage,
    /// The messages sent to the model.
    pub request_messages: Vec<ModelMessage>,
    /// The messages this step appended to the conversation: the assistant
    /// message followed by the tool results.
    pub response_messages: Vec<ModelMessage>,
    /// Provider-specific data of the response.
    pub opaque: Option<OpaqueMessage>,
}

impl StepResult {
    /// Returns `true` if at least one valid tool call of this step
    /// succeeded, which is what the model would react to in a next step.
    pub fn has_successful_tool_call(&self) -> bool {
        self.tool_results.iter().any(|result| !result.is_error())
    }
}

/// Sums the usage of all steps.
pub fn total_usage(steps: &[StepResult]) -> Usage {
    steps
        .iter()
        .fold(Usage::default(), |total, step| total + step.usage)
}
