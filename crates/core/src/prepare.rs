//! Per-step configuration.
//!
//! Before each model call, the run-level defaults are resolved into the
//! configuration of that step. A [`PrepareStep`] hook can override parts
//! of it for one step; everything the hook leaves unset keeps the default.

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_model::{ModelMessage, SamplingParams, ToolChoice};

use crate::BoxError;
use crate::model_client::ModelClient;
use crate::step::StepResult;
use crate::tool::{ToolRegistry, ToolSet};

/// Arguments of a [`PrepareStep`] invocation.
#[derive(Debug)]
pub struct PrepareStepInput<'a> {
    /// Steps completed so far.
    pub steps: &'a [StepResult],
    /// Zero-based index of the upcoming step.
    pub step_number: usize,
    /// The default model of the run.
    pub model: &'a ModelClient,
    /// The conversation so far, which is what the model would see by
    /// default.
    pub messages: &'a [ModelMessage],
}

/// Overrides for one step. Fields left as `None` keep the run defaults.
#[derive(Clone, Debug, Default)]
pub struct PrepareStepOutput {
    /// Model to call instead of the default one.
    pub model: Option<ModelClient>,
    /// System prompt replacing the default one.
    pub system: Option<String>,
    /// Messages sent to the model instead of the conversation. The
    /// conversation itself is left untouched.
    pub messages: Option<Vec<ModelMessage>>,
    /// Names of the tools available in this step. Only registered tools
    /// can be activated, unknown names are ignored.
    pub active_tools: Option<Vec<String>>,
    /// Tool choice replacing the default one.
    pub tool_choice: Option<ToolChoice>,
    /// Sampling parameters replacing the default ones.
    pub sampling: Option<SamplingParams>,
}

/// A hook adjusting the configuration of each step.
///
/// Errors are logged and the step proceeds with the defaults.
#[async_trait]
pub trait PrepareStep: Send + Sync {
    /// Returns the overrides for the upcoming step.
    async fn prepare_step(
        &self,
        input: PrepareStepInput<'_>,
    ) -> Result<PrepareStepOutput, BoxError>;
}

/// Run-level defaults the step configuration starts from.
pub(crate) struct StepDefaults<'a> {
    pub model: &'a ModelClient,
    pub tools: &'a ToolRegistry,
    pub active_tools: Option<&'a [String]>,
    pub tool_choice: &'a ToolChoice,
    pub sampling: &'a SamplingParams,
    pub hook: Option<&'a Arc<dyn PrepareStep>>,
}

/// The resolved configuration of one step.
pub(crate) struct StepConfig {
    pub model: ModelClient,
    pub messages: Vec<ModelMessage>,
    pub tools: ToolSet,
    pub tool_choice: ToolChoice,
    pub sampling: SamplingParams,
}

/// Resolves the configuration of the step `step_number`.
pub(crate) async fn prepare(
    defaults: &StepDefaults<'_>,
    steps: &[StepResult],
    step_number: usize,
    conversation: &[ModelMessage],
) -> StepConfig {
    let overrides = match defaults.hook {
        Some(hook) => {
            let input = PrepareStepInput {
                steps,
                step_number,
                model: defaults.model,
                messages: conversation,
            };
            match hook.prepare_step(input).await {
                Ok(overrides) => overrides,
                Err(err) => {
                    warn!("prepare step hook failed, using defaults: {err}");
                    PrepareStepOutput::default()
                }
            }
        }
        None => PrepareStepOutput::default(),
    };
    trace!("step overrides: {overrides:?}");

    let PrepareStepOutput {
        model,
        system,
        messages,
        active_tools,
        tool_choice,
        sampling,
    } = overrides;

    let mut messages = messages.unwrap_or_else(|| conversation.to_vec());
    if let Some(system) = system {
        apply_system_prompt(&mut messages, system);
    }

    let active_tools = active_tools.as_deref().or(defaults.active_tools);
    StepConfig {
        model: model.unwrap_or_else(|| defaults.model.clone()),
        messages,
        tools: defaults.tools.select(active_tools),
        tool_choice: tool_choice.unwrap_or_else(|| defaults.tool_choice.clone()),
        sampling: sampling.unwrap_or_else(|| defaults.sampling.clone()),
    }
}

/// Makes `system` the leading system message, replacing the existing one.
fn apply_system_prompt(messages: &mut Vec<ModelMessage>, system: String) {
    match messages.first_mut() {
        Some(ModelMessage::System(existing)) => *existing = system,
        _ => messages.insert(0, ModelMessage::System(system)),
    }
}
