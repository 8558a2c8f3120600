use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ContentPart, OpaqueMessage, ToolCallPart};

/// A request to be sent to the model provider.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelRequest {
    /// The input messages.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
    /// How the model should pick tools.
    pub tool_choice: ToolChoice,
    /// Sampling parameters.
    pub sampling: SamplingParams,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// An assistant message.
    Assistant(AssistantMessage),
    /// A tool call result.
    Tool(ToolCallResult),
}

impl ModelMessage {
    /// Creates a text-only assistant message.
    #[inline]
    pub fn assistant_text<S: Into<String>>(text: S) -> Self {
        Self::Assistant(AssistantMessage {
            parts: vec![ContentPart::text(text)],
            opaque: None,
        })
    }

    /// Returns the tool calls if this is an assistant message.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        let parts = match self {
            Self::Assistant(msg) => msg.parts.as_slice(),
            _ => &[],
        };
        parts.iter().filter_map(ContentPart::as_tool_call)
    }
}

/// A message produced by the model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssistantMessage {
    /// Ordered content of the message.
    pub parts: Vec<ContentPart>,
    /// The raw message from the provider, if it has one.
    ///
    /// Providers that need the complete original structure to continue the
    /// conversation can read it back from here when building the next
    /// request.
    pub opaque: Option<OpaqueMessage>,
}

impl AssistantMessage {
    /// Returns the concatenated text of this message.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text: t } = part {
                text.push_str(t);
            }
        }
        text
    }
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolCallResult {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// Name of the called tool.
    pub name: String,
    /// The result of the tool call, or the error message.
    pub content: String,
    /// Whether `content` describes an error.
    pub is_error: bool,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}

/// Controls whether and which tools the model may call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
    /// The model must not call tools.
    None,
    /// The model must call at least one tool.
    Required,
    /// The model must call the named tool.
    Tool(String),
}

/// Sampling parameters passed through to the provider.
///
/// Unset fields leave the choice to the provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling.
    pub top_p: Option<f32>,
    /// Top-k sampling.
    pub top_k: Option<u32>,
    /// Maximum number of tokens to generate.
    pub max_output_tokens: Option<u32>,
    /// Presence penalty.
    pub presence_penalty: Option<f32>,
    /// Frequency penalty.
    pub frequency_penalty: Option<f32>,
    /// Seed for deterministic sampling.
    pub seed: Option<u64>,
    /// Sequences that stop generation.
    pub stop_sequences: Vec<String>,
}
