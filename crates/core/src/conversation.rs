//! Conversation-related types.

use stepwise_model::ModelMessage;

/// The ordered messages of a run.
///
/// The conversation of a run only ever grows: the step loop appends each
/// step's assistant message followed by its tool results, and nothing is
/// removed or rewritten afterwards. A step may send a different message
/// list to the model (see [`crate::prepare`]), but that never changes the
/// conversation itself.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

impl Conversation {
    /// Creates a conversation starting with the given messages.
    #[inline]
    pub fn from_messages(messages: Vec<ModelMessage>) -> Self {
        Self { messages }
    }

    #[inline]
    pub(crate) fn push(&mut self, msg: ModelMessage) {
        self.messages.push(msg);
    }

    #[inline]
    pub(crate) fn extend<I: IntoIterator<Item = ModelMessage>>(&mut self, msgs: I) {
        self.messages.extend(msgs);
    }

    /// Returns all messages.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the most recent message.
    #[inline]
    pub fn last(&self) -> Option<&ModelMessage> {
        self.messages.last()
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there is no message.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consumes the conversation, returning its messages.
    #[inline]
    pub fn into_messages(self) -> Vec<ModelMessage> {
        self.messages
    }
}
