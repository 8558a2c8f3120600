use std::sync::Arc;

use serde_json::Value;
use stepwise_model::{
    AssistantMessage, ContentPart, ModelFinishReason, ModelMessage,
    ModelRequest, Usage,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::Agent;
use crate::conversation::Conversation;
use crate::error::RunError;
use crate::prepare::{StepDefaults, prepare};
use crate::step::{StepResult, total_usage};
use crate::tool::{
    DispatchOptions, ToolCall, ToolResult, dispatch, parse_tool_calls,
};

/// The input of a run.
#[derive(Clone, Debug, PartialEq)]
pub enum RunInput {
    /// A single user prompt.
    Prompt(String),
    /// An explicit list of messages to start from.
    Messages(Vec<ModelMessage>),
}

impl RunInput {
    /// Builds the initial conversation. The system prompt is prepended
    /// unless the messages already start with a system message.
    fn into_messages(self, system: Option<&str>) -> Vec<ModelMessage> {
        let mut messages = match self {
            Self::Prompt(prompt) => vec![ModelMessage::User(prompt)],
            Self::Messages(messages) => messages,
        };
        let has_system =
            matches!(messages.first(), Some(ModelMessage::System(_)));
        match system {
            Some(system) if !has_system => {
                messages.insert(0, ModelMessage::System(system.to_owned()));
            }
            _ => {}
        }
        messages
    }
}

impl From<&str> for RunInput {
    #[inline]
    fn from(prompt: &str) -> Self {
        Self::Prompt(prompt.to_owned())
    }
}

impl From<String> for RunInput {
    #[inline]
    fn from(prompt: String) -> Self {
        Self::Prompt(prompt)
    }
}

impl From<Vec<ModelMessage>> for RunInput {
    #[inline]
    fn from(messages: Vec<ModelMessage>) -> Self {
        Self::Messages(messages)
    }
}

/// Per-run options.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// An arbitrary value passed to every tool call of the run.
    pub context: Option<Value>,
    /// A token to cancel the run with.
    pub cancellation: Option<CancellationToken>,
}

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminalReason {
    /// A stop condition was met.
    StoppedByCondition,
    /// The last step had no successful tool call to react to.
    StoppedNoToolCalls,
    /// The maximum number of steps was reached.
    StoppedStepLimit,
    /// The model call failed or the run was cancelled.
    Failed,
}

/// The result of a run.
///
/// A failed run still carries every step completed before the failure.
#[derive(Debug)]
pub struct RunOutput {
    /// All completed steps, in order.
    pub steps: Vec<StepResult>,
    /// The final conversation.
    pub conversation: Conversation,
    /// Why the run ended.
    pub terminal_reason: TerminalReason,
    /// The error that ended the run, if it failed.
    pub error: Option<RunError>,
    /// The usage summed over all steps.
    pub total_usage: Usage,
}

impl RunOutput {
    /// Returns the last step.
    #[inline]
    pub fn final_result(&self) -> Option<&StepResult> {
        self.steps.last()
    }

    /// Returns the text of the last step.
    #[inline]
    pub fn text(&self) -> &str {
        self.final_result().map_or("", |step| step.text.as_str())
    }

    /// Returns the number of completed steps.
    #[inline]
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the run ended without an error.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts a failed run into its error, dropping the partial steps.
    pub fn into_result(mut self) -> Result<Self, RunError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    PrepareStep,
    ModelCall,
    ParseToolCalls,
    DispatchTools,
    RecordStep,
    EvaluateStop,
}

impl Stage {
    #[inline]
    fn advance(&mut self, next: Stage) {
        debug!("{self:?} -> {next:?}");
        *self = next;
    }
}

struct RunContext {
    context: Option<Arc<Value>>,
    cancellation: CancellationToken,
}

/// What a step leaves behind, besides its result.
struct StepOutcome {
    step: StepResult,
    tool_messages: Vec<ModelMessage>,
}

impl Agent {
    /// Runs the agent with default options.
    #[inline]
    pub async fn run<I: Into<RunInput>>(&self, input: I) -> RunOutput {
        self.run_with(input, RunOptions::default()).await
    }

    /// Runs the agent until a stop condition is met, the last step has
    /// nothing left to react to, the step limit is reached, or the model
    /// call fails.
    pub async fn run_with<I: Into<RunInput>>(
        &self,
        input: I,
        options: RunOptions,
    ) -> RunOutput {
        let messages = input.into().into_messages(self.settings.system.as_deref());
        let ctx = RunContext {
            context: options.context.map(Arc::new),
            cancellation: options.cancellation.unwrap_or_default(),
        };
        self.run_loop(Conversation::from_messages(messages), ctx)
            .instrument(debug_span!("run"))
            .await
    }

    async fn run_loop(
        &self,
        mut conversation: Conversation,
        ctx: RunContext,
    ) -> RunOutput {
        let settings = &self.settings;
        let max_steps = settings.max_steps.map(|max| max.max(1));
        let mut steps: Vec<StepResult> = Vec::new();

        let (terminal_reason, error) = loop {
            let step_number = steps.len();
            if ctx.cancellation.is_cancelled() {
                break (TerminalReason::Failed, Some(RunError::Cancelled));
            }

            let outcome = self
                .run_step(step_number, &steps, &mut conversation, &ctx)
                .instrument(debug_span!("step", step_number))
                .await;
            let StepOutcome {
                step,
                tool_messages,
            } = match outcome {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!("step {step_number} failed: {err}");
                    break (TerminalReason::Failed, Some(err));
                }
            };

            if let Some(on_step_finish) = &settings.on_step_finish {
                if let Err(err) = on_step_finish(&step) {
                    warn!("on_step_finish callback failed: {err}");
                }
            }
            let has_successful_tool_call = step.has_successful_tool_call();
            steps.push(step);

            // Conditions see the step's assistant message as the last one.
            let stop = settings.stop_when.is_met(steps.len(), &conversation);
            conversation.extend(tool_messages);

            if ctx.cancellation.is_cancelled() {
                break (TerminalReason::Failed, Some(RunError::Cancelled));
            }
            if stop {
                break (TerminalReason::StoppedByCondition, None);
            }
            if !has_successful_tool_call {
                break (TerminalReason::StoppedNoToolCalls, None);
            }
            if max_steps.is_some_and(|max| steps.len() >= max) {
                break (TerminalReason::StoppedStepLimit, None);
            }
        };

        debug!("run finished after {} steps: {terminal_reason:?}", steps.len());
        RunOutput {
            total_usage: total_usage(&steps),
            steps,
            conversation,
            terminal_reason,
            error,
        }
    }

    async fn run_step(
        &self,
        step_number: usize,
        steps: &[StepResult],
        conversation: &mut Conversation,
        ctx: &RunContext,
    ) -> Result<StepOutcome, RunError> {
        let settings = &self.settings;
        let mut stage = Stage::PrepareStep;
        debug!("{stage:?}");

        let defaults = StepDefaults {
            model: &self.model,
            tools: &self.tools,
            active_tools: settings.active_tools.as_deref(),
            tool_choice: &settings.tool_choice,
            sampling: &settings.sampling,
            hook: settings.prepare_step.as_ref(),
        };
        let config =
            prepare(&defaults, steps, step_number, conversation.messages()).await;

        stage.advance(Stage::ModelCall);
        let request_messages = config.messages.clone();
        let request = ModelRequest {
            messages: config.messages,
            tools: config.tools.definitions(),
            tool_choice: config.tool_choice,
            sampling: config.sampling,
        };
        let send_fut = config.model.send_request(
            request,
            settings.on_chunk.clone(),
            &settings.retry,
        );
        let response = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => return Err(RunError::Cancelled),
            resp = send_fut => resp.map_err(RunError::Model)?,
        };

        stage.advance(Stage::ParseToolCalls);
        // Repairing may call a model as well.
        let parse_fut = parse_tool_calls(
            &response.tool_calls,
            &config.tools,
            settings.repair.as_deref(),
            &request_messages,
        );
        let tool_calls = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => return Err(RunError::Cancelled),
            tool_calls = parse_fut => tool_calls,
        };
        let content = merge_tool_calls(response.parts, &tool_calls);
        let assistant = ModelMessage::Assistant(AssistantMessage {
            parts: content.clone(),
            opaque: response.opaque.clone(),
        });
        conversation.push(assistant.clone());

        stage.advance(Stage::DispatchTools);
        let options = DispatchOptions {
            messages: Arc::from(request_messages.as_slice()),
            context: ctx.context.clone(),
            cancellation: ctx.cancellation.clone(),
            max_concurrency: settings.max_concurrent_tools,
        };
        let tool_results = dispatch(&tool_calls, &config.tools, &options).await;

        stage.advance(Stage::RecordStep);
        let tool_messages: Vec<_> =
            tool_results.iter().map(ToolResult::to_message).collect();
        let mut response_messages = Vec::with_capacity(tool_messages.len() + 1);
        response_messages.push(assistant);
        response_messages.extend(tool_messages.iter().cloned());

        let step = StepResult {
            step_number,
            model_id: config.model.model_id().to_owned(),
            text: collect_text(&content, false),
            reasoning_text: Some(collect_text(&content, true))
                .filter(|text| !text.is_empty()),
            files: content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::File(file) => Some(file.clone()),
                    _ => None,
                })
                .collect(),
            sources: content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Source(source) => Some(source.clone()),
                    _ => None,
                })
                .collect(),
            content,
            tool_calls,
            tool_results,
            finish_reason: response
                .finish_reason
                .unwrap_or(ModelFinishReason::Other),
            usage: response.usage,
            request_messages,
            response_messages,
            opaque: response.opaque,
        };
        trace!("step result: {step:?}");

        stage.advance(Stage::EvaluateStop);
        Ok(StepOutcome {
            step,
            tool_messages,
        })
    }
}

/// Replaces the tool call parts of a response with the parsed calls, so
/// that repaired calls are recorded the way they were executed.
fn merge_tool_calls(
    parts: Vec<ContentPart>,
    tool_calls: &[ToolCall],
) -> Vec<ContentPart> {
    let mut parsed = tool_calls.iter().map(ToolCall::to_part);
    parts
        .into_iter()
        .map(|part| match part {
            ContentPart::ToolCall(_) => {
                parsed.next().map_or(part, ContentPart::ToolCall)
            }
            part => part,
        })
        .collect()
}

fn collect_text(content: &[ContentPart], reasoning: bool) -> String {
    content
        .iter()
        .filter_map(|part| match (part, reasoning) {
            (ContentPart::Text { text }, false) => Some(text.as_str()),
            (ContentPart::Reasoning { text }, true) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
