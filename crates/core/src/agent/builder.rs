use std::sync::Arc;

use stepwise_model::{ModelProvider, ModelResponseEvent, SamplingParams, ToolChoice};

use super::{Agent, AgentSettings};
use crate::BoxError;
use crate::model_client::{ModelClient, RetryPolicy};
use crate::prepare::PrepareStep;
use crate::step::StepResult;
use crate::stop::StopWhen;
use crate::tool::{DynamicTool, RepairToolCall, StreamingTool, Tool, ToolRegistry};

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) tools: ToolRegistry,
    pub(crate) settings: AgentSettings,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self::with_model_client(ModelClient::new(provider))
    }

    /// Creates a new builder with an existing model client.
    #[inline]
    pub fn with_model_client(model_client: ModelClient) -> Self {
        Self {
            model_client,
            tools: ToolRegistry::default(),
            settings: AgentSettings::default(),
        }
    }

    /// Sets the system prompt that starts every conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.settings.system = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.add_tool(tool);
        self
    }

    /// Registers a streaming tool.
    #[inline]
    pub fn with_streaming_tool<T: StreamingTool>(mut self, tool: T) -> Self {
        self.tools.add_streaming_tool(tool);
        self
    }

    /// Registers a dynamic tool.
    #[inline]
    pub fn with_dynamic_tool<T: DynamicTool>(mut self, tool: T) -> Self {
        self.tools.add_dynamic_tool(tool);
        self
    }

    /// Sets how the model should pick tools. Defaults to
    /// [`ToolChoice::Auto`].
    #[inline]
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.settings.tool_choice = tool_choice;
        self
    }

    /// Sets the sampling parameters sent with every request.
    #[inline]
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.settings.sampling = sampling;
        self
    }

    /// Sets when a run stops. Defaults to stopping after one step.
    #[inline]
    pub fn with_stop_when<S: Into<StopWhen>>(mut self, stop_when: S) -> Self {
        self.settings.stop_when = stop_when.into();
        self
    }

    /// Sets the maximum number of steps of a run. A limit of zero is
    /// treated as one, since a run always makes at least one step.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.settings.max_steps = Some(max_steps);
        self
    }

    /// Restricts the tools available to the model to the given names.
    #[inline]
    pub fn with_active_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.active_tools =
            Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Attaches a hook adjusting the configuration of each step.
    #[inline]
    pub fn with_prepare_step<H: PrepareStep + 'static>(mut self, hook: H) -> Self {
        self.settings.prepare_step = Some(Arc::new(hook));
        self
    }

    /// Attaches a hook repairing tool calls that fail to parse.
    #[inline]
    pub fn with_tool_call_repair<R: RepairToolCall + 'static>(
        mut self,
        repair: R,
    ) -> Self {
        self.settings.repair = Some(Arc::new(repair));
        self
    }

    /// Attaches a callback to be invoked after each step is recorded.
    ///
    /// Errors returned by the callback are logged and otherwise ignored.
    #[inline]
    pub fn on_step_finish(
        mut self,
        on_step_finish: impl Fn(&StepResult) -> Result<(), BoxError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.settings.on_step_finish = Some(Arc::new(on_step_finish));
        self
    }

    /// Attaches a callback receiving the model response events as they
    /// stream in.
    #[inline]
    pub fn on_chunk(
        mut self,
        on_chunk: impl Fn(&ModelResponseEvent) + Send + Sync + 'static,
    ) -> Self {
        self.settings.on_chunk = Some(Arc::new(on_chunk));
        self
    }

    /// Limits how many tools of a step may run at the same time. Tools
    /// run without a limit by default.
    #[inline]
    pub fn with_max_concurrent_tools(mut self, limit: usize) -> Self {
        self.settings.max_concurrent_tools = Some(limit);
        self
    }

    /// Sets how transient model errors are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::from_builder(self)
    }
}
