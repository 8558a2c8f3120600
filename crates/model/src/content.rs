use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A part of an assistant message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Reasoning text, if the model exposes it.
    Reasoning {
        /// The reasoning text.
        text: String,
    },
    /// A request to call a tool.
    ToolCall(ToolCallPart),
    /// A file generated by the model.
    File(GeneratedFile),
    /// A source the model cited.
    Source(Source),
}

impl ContentPart {
    /// Creates a text part.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the tool call in this part, if it's a tool call part.
    #[inline]
    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// A tool call recorded in the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// The unique identifier for the tool call.
    pub id: String,
    /// The name of the called tool.
    pub name: String,
    /// The parsed input. Calls whose arguments are not valid JSON keep
    /// the raw text as a JSON string.
    pub input: Value,
}

/// A file generated by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// IANA media type of the file.
    pub media_type: String,
    /// Base64-encoded file content.
    pub data: String,
}

/// A source cited by the model, e.g. a web page it searched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Provider-assigned identifier of the source.
    pub id: String,
    /// URL of the source.
    pub url: String,
    /// Title of the source, if known.
    pub title: Option<String>,
}
