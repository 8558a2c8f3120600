mod builder;
mod run;

use std::sync::Arc;

use stepwise_model::{SamplingParams, ToolChoice};

use crate::BoxError;
use crate::model_client::{ChunkCallback, ModelClient, RetryPolicy};
use crate::prepare::PrepareStep;
use crate::step::StepResult;
use crate::stop::StopWhen;
use crate::tool::{
    DynamicTool, RegisteredTool, RepairToolCall, StreamingTool, Tool,
    ToolRegistry,
};
pub use builder::AgentBuilder;
pub use run::{RunInput, RunOptions, RunOutput, TerminalReason};

pub(crate) type StepFinishFn =
    dyn Fn(&StepResult) -> Result<(), BoxError> + Send + Sync;

/// Settings shared by all runs of an agent.
#[derive(Default)]
pub(crate) struct AgentSettings {
    pub system: Option<String>,
    pub tool_choice: ToolChoice,
    pub sampling: SamplingParams,
    pub stop_when: StopWhen,
    pub max_steps: Option<usize>,
    pub active_tools: Option<Vec<String>>,
    pub prepare_step: Option<Arc<dyn PrepareStep>>,
    pub repair: Option<Arc<dyn RepairToolCall>>,
    pub on_step_finish: Option<Arc<StepFinishFn>>,
    pub on_chunk: Option<ChunkCallback>,
    pub max_concurrent_tools: Option<usize>,
    pub retry: RetryPolicy,
}

/// An agent drives a model through multiple steps, executing the tools it
/// requests and feeding the results back, until a stop condition is met.
///
/// Runs don't share any state, an agent can serve any number of runs
/// concurrently. The toolset can only be changed while no run is in
/// flight, since that requires exclusive access to the agent.
pub struct Agent {
    model: ModelClient,
    tools: ToolRegistry,
    settings: AgentSettings,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            tools,
            settings,
        } = builder;
        Self {
            model: model_client,
            tools,
            settings,
        }
    }

    /// Returns the default model of the agent.
    #[inline]
    pub fn model(&self) -> &ModelClient {
        &self.model
    }

    /// Returns the toolset of the agent.
    #[inline]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Registers a tool, returning the tool it replaced.
    #[inline]
    pub fn add_tool<T: Tool>(&mut self, tool: T) -> Option<RegisteredTool> {
        self.tools.add_tool(tool)
    }

    /// Registers a streaming tool, returning the tool it replaced.
    #[inline]
    pub fn add_streaming_tool<T: StreamingTool>(
        &mut self,
        tool: T,
    ) -> Option<RegisteredTool> {
        self.tools.add_streaming_tool(tool)
    }

    /// Registers a dynamic tool, returning the tool it replaced.
    #[inline]
    pub fn add_dynamic_tool<T: DynamicTool>(
        &mut self,
        tool: T,
    ) -> Option<RegisteredTool> {
        self.tools.add_dynamic_tool(tool)
    }

    /// Unregisters a tool by name.
    #[inline]
    pub fn remove_tool(&mut self, name: &str) -> Option<RegisteredTool> {
        self.tools.remove_tool(name)
    }

    /// Looks up a tool by name.
    #[inline]
    pub fn get_tool(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.get_tool(name)
    }

    /// Returns the names of all registered tools, sorted.
    #[inline]
    pub fn list_tools(&self) -> Vec<String> {
        self.tools.list_tools()
    }
}
