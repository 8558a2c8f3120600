use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepwise_model::{ModelFinishReason, Source, ToolCallRequest, Usage};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "reasoning_delta")]
    ReasoningDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
    #[serde(rename = "source")]
    Source(Source),
}

impl PresetEvent {
    /// Creates a tool call event whose arguments are the serialized `input`.
    #[inline]
    pub fn tool_call<S1, S2>(id: S1, name: S2, input: Value) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::ToolCall(ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments: input.to_string(),
        })
    }
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// Usage reported after all events.
    pub usage: Option<Usage>,
    /// Finish reason to report. If not set, it's `ToolCalls` when the
    /// response contains a tool call, `Stop` otherwise.
    pub finish_reason: Option<ModelFinishReason>,
    /// If set, the request will fail in the first `failure` attempts
    /// with a rate limit error. `Some(0)` means the request will fail
    /// infinitely, with a non-transient error.
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            ..Default::default()
        }
    }

    /// Creates a `PresetResponse` with a single text message.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Sets the usage to report.
    #[inline]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    pub(crate) fn resolved_finish_reason(&self) -> ModelFinishReason {
        if let Some(reason) = self.finish_reason {
            return reason;
        }
        let has_tool_call = self
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        if has_tool_call {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        }
    }
}
