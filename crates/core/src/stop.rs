//! Stop conditions of a run.
//!
//! A stop condition is a pure predicate over the number of completed steps
//! and the conversation so far. Conditions are evaluated after every step,
//! when the conversation ends with that step's assistant message (tool
//! results of the step are appended right after the evaluation).

use std::fmt::{self, Debug};
use std::sync::Arc;

use stepwise_model::ModelMessage;

use crate::conversation::Conversation;

type Predicate = dyn Fn(usize, &Conversation) -> bool + Send + Sync;

/// A predicate deciding whether a run should stop.
#[derive(Clone)]
pub struct StopCondition {
    label: &'static str,
    predicate: Arc<Predicate>,
}

impl StopCondition {
    /// Creates a custom stop condition.
    ///
    /// The predicate receives the number of completed steps and the
    /// conversation. It must be side-effect free, since it may be evaluated
    /// any number of times.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(usize, &Conversation) -> bool + Send + Sync + 'static,
    {
        Self {
            label: "custom",
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluates the condition.
    #[inline]
    pub fn is_met(&self, step_count: usize, conversation: &Conversation) -> bool {
        (self.predicate)(step_count, conversation)
    }
}

impl Debug for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StopCondition").field(&self.label).finish()
    }
}

/// Stops once `n` steps have completed.
pub fn step_count_is(n: usize) -> StopCondition {
    StopCondition {
        label: "step_count_is",
        predicate: Arc::new(move |step_count: usize, _: &Conversation| {
            step_count >= n
        }),
    }
}

/// Stops when the last message is an assistant message that calls a tool
/// named `name`.
pub fn has_tool_call<S: Into<String>>(name: S) -> StopCondition {
    let name = name.into();
    StopCondition {
        label: "has_tool_call",
        predicate: Arc::new(move |_: usize, conversation: &Conversation| {
            last_tool_calls(conversation).any(|call| call == name)
        }),
    }
}

/// Stops when the last message is an assistant message that calls any tool.
pub fn has_any_tool_call() -> StopCondition {
    StopCondition {
        label: "has_any_tool_call",
        predicate: Arc::new(|_: usize, conversation: &Conversation| {
            last_tool_calls(conversation).next().is_some()
        }),
    }
}

fn last_tool_calls(conversation: &Conversation) -> impl Iterator<Item = &str> {
    conversation
        .last()
        .filter(|msg| matches!(msg, ModelMessage::Assistant(_)))
        .into_iter()
        .flat_map(ModelMessage::tool_calls)
        .map(|call| call.name.as_str())
}

/// A set of stop conditions, met when any of them is met.
///
/// The default is to stop after one step.
#[derive(Clone, Debug)]
pub struct StopWhen(Vec<StopCondition>);

impl StopWhen {
    /// Creates a set from the given conditions.
    ///
    /// An empty set is never met, leaving the run to end by other means.
    #[inline]
    pub fn any<I: IntoIterator<Item = StopCondition>>(conditions: I) -> Self {
        Self(conditions.into_iter().collect())
    }

    /// Evaluates all conditions, returning `true` if any is met.
    pub fn is_met(&self, step_count: usize, conversation: &Conversation) -> bool {
        self.0
            .iter()
            .any(|condition| condition.is_met(step_count, conversation))
    }

    /// Returns the conditions in this set.
    #[inline]
    pub fn conditions(&self) -> &[StopCondition] {
        &self.0
    }
}

impl Default for StopWhen {
    #[inline]
    fn default() -> Self {
        Self(vec![step_count_is(1)])
    }
}

impl From<StopCondition> for StopWhen {
    #[inline]
    fn from(condition: StopCondition) -> Self {
        Self(vec![condition])
    }
}

impl From<Vec<StopCondition>> for StopWhen {
    #[inline]
    fn from(conditions: Vec<StopCondition>) -> Self {
        Self(conditions)
    }
}
