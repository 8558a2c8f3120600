use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::sync::Arc;

use serde_json::Value;
use stepwise_model::ModelTool;

use super::object::{DynamicToolImpl, StreamingToolImpl, ToolObject, TypedTool};
use super::{DynamicTool, StreamingTool, Tool};

/// A tool stored in a [`ToolRegistry`].
#[derive(Clone)]
pub struct RegisteredTool(Arc<dyn ToolObject>);

impl RegisteredTool {
    /// Returns the name of the tool.
    #[inline]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Returns the description of the tool.
    #[inline]
    pub fn description(&self) -> &str {
        self.0.description()
    }

    /// Returns the parameter schema of the tool.
    #[inline]
    pub fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    /// Returns `true` if this is a [`DynamicTool`].
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.0.is_dynamic()
    }

    /// Returns the definition sent to the model.
    #[inline]
    pub fn definition(&self) -> ModelTool {
        definition_of(self.0.as_ref())
    }
}

impl Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name())
            .field("dynamic", &self.is_dynamic())
            .finish_non_exhaustive()
    }
}

fn definition_of(tool: &dyn ToolObject) -> ModelTool {
    ModelTool {
        name: tool.name().to_owned(),
        description: tool.description().to_owned(),
        parameters: tool.parameter_schema().clone(),
    }
}

/// An object that owns the toolset of an agent.
///
/// Registering a tool with a name that is already taken replaces the
/// previous tool.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolObject>>,
}

impl ToolRegistry {
    /// Registers a tool, returning the tool it replaced.
    #[inline]
    pub fn add_tool<T: Tool>(&mut self, tool: T) -> Option<RegisteredTool> {
        self.insert(Arc::new(TypedTool(tool)))
    }

    /// Registers a streaming tool, returning the tool it replaced.
    #[inline]
    pub fn add_streaming_tool<T: StreamingTool>(
        &mut self,
        tool: T,
    ) -> Option<RegisteredTool> {
        self.insert(Arc::new(StreamingToolImpl(tool)))
    }

    /// Registers a dynamic tool, returning the tool it replaced.
    #[inline]
    pub fn add_dynamic_tool<T: DynamicTool>(
        &mut self,
        tool: T,
    ) -> Option<RegisteredTool> {
        self.insert(Arc::new(DynamicToolImpl(tool)))
    }

    fn insert(&mut self, tool: Arc<dyn ToolObject>) -> Option<RegisteredTool> {
        let name = tool.name().to_owned();
        debug!("registering tool: {name}");
        self.tools.insert(name, tool).map(RegisteredTool)
    }

    /// Unregisters a tool by name.
    #[inline]
    pub fn remove_tool(&mut self, name: &str) -> Option<RegisteredTool> {
        self.tools.remove(name).map(RegisteredTool)
    }

    /// Looks up a tool by name.
    #[inline]
    pub fn get_tool(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.get(name).cloned().map(RegisteredTool)
    }

    /// Returns the names of all registered tools, sorted.
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the definitions sent to the model, sorted by name.
    ///
    /// With `active` set, only registered tools named in it are returned.
    #[inline]
    pub fn definitions(&self, active: Option<&[String]>) -> Vec<ModelTool> {
        self.select(active).definitions()
    }

    /// Selects the tools for one step.
    ///
    /// With `active` set, only registered tools named in it are selected;
    /// names that are not registered are ignored.
    pub(crate) fn select(&self, active: Option<&[String]>) -> ToolSet {
        let tools = match active {
            None => self
                .tools
                .iter()
                .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
                .collect(),
            Some(active) => active
                .iter()
                .filter_map(|name| {
                    let tool = self.tools.get(name);
                    if tool.is_none() {
                        debug!("ignoring unknown active tool: {name}");
                    }
                    tool.map(|tool| (name.clone(), Arc::clone(tool)))
                })
                .collect(),
        };
        ToolSet { tools }
    }
}

impl Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_tools())
            .finish()
    }
}

/// The tools that are active in one step.
#[derive(Clone, Default)]
pub(crate) struct ToolSet {
    tools: BTreeMap<String, Arc<dyn ToolObject>>,
}

impl ToolSet {
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolObject>> {
        self.tools.get(name)
    }

    #[inline]
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .values()
            .map(|tool| definition_of(tool.as_ref()))
            .collect()
    }
}
