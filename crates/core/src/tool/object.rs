use std::pin::{Pin, pin};

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{DynamicTool, Error, StreamingTool, Tool, ToolCallContext};
use crate::BoxError;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased tool, so that tools of different shapes can live in the
/// same registry.
pub(crate) trait ToolObject: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameter_schema(&self) -> &Value;

    fn is_dynamic(&self) -> bool {
        false
    }

    /// Tool-specific validation, after the input passed the schema check.
    fn validate_input(&self, input: Value) -> Result<Value, Error>;

    fn on_input_available(
        &self,
        _input: &Value,
        _ctx: &ToolCallContext,
    ) -> BoxFuture<Result<(), BoxError>> {
        Box::pin(std::future::ready(Ok(())))
    }

    fn execute(
        &self,
        input: Value,
        ctx: ToolCallContext,
    ) -> BoxFuture<Result<Value, Error>>;
}

fn deserialize_input<I: DeserializeOwned>(input: Value) -> Result<I, Error> {
    serde_json::from_value(input)
        .map_err(|err| Error::invalid_input().with_reason(format!("{err}")))
}

fn serialize_output<O: Serialize>(output: O) -> Result<Value, Error> {
    serde_json::to_value(output).map_err(|err| {
        Error::execution_error()
            .with_reason(format!("failed to serialize tool output: {err}"))
    })
}

pub(crate) struct TypedTool<T: Tool>(pub T);

impl<T: Tool> ToolObject for TypedTool<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    fn validate_input(&self, input: Value) -> Result<Value, Error> {
        let input = self.0.validate_input(input)?;
        // Only checking here, the typed input is built again on execution.
        deserialize_input::<T::Input>(input.clone())?;
        Ok(input)
    }

    #[inline]
    fn on_input_available(
        &self,
        input: &Value,
        ctx: &ToolCallContext,
    ) -> BoxFuture<Result<(), BoxError>> {
        Box::pin(self.0.on_input_available(input, ctx))
    }

    fn execute(
        &self,
        input: Value,
        ctx: ToolCallContext,
    ) -> BoxFuture<Result<Value, Error>> {
        let input: T::Input = match deserialize_input(input) {
            Ok(input) => input,
            Err(err) => return Box::pin(std::future::ready(Err(err))),
        };
        let fut = self.0.execute(input, ctx);
        Box::pin(async move { serialize_output(fut.await?) })
    }
}

pub(crate) struct StreamingToolImpl<T: StreamingTool>(pub T);

impl<T: StreamingTool> ToolObject for StreamingToolImpl<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    fn validate_input(&self, input: Value) -> Result<Value, Error> {
        let input = self.0.validate_input(input)?;
        deserialize_input::<T::Input>(input.clone())?;
        Ok(input)
    }

    #[inline]
    fn on_input_available(
        &self,
        input: &Value,
        ctx: &ToolCallContext,
    ) -> BoxFuture<Result<(), BoxError>> {
        Box::pin(self.0.on_input_available(input, ctx))
    }

    fn execute(
        &self,
        input: Value,
        ctx: ToolCallContext,
    ) -> BoxFuture<Result<Value, Error>> {
        let input: T::Input = match deserialize_input(input) {
            Ok(input) => input,
            Err(err) => return Box::pin(std::future::ready(Err(err))),
        };
        let stream = self.0.execute(input, ctx);
        Box::pin(async move {
            let mut stream = pin!(stream);
            let mut last = None;
            while let Some(item) = stream.next().await {
                trace!("tool yielded a preliminary output");
                last = Some(item?);
            }
            match last {
                Some(output) => serialize_output(output),
                None => Ok(Value::Null),
            }
        })
    }
}

pub(crate) struct DynamicToolImpl<T: DynamicTool>(pub T);

impl<T: DynamicTool> ToolObject for DynamicToolImpl<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    #[inline]
    fn is_dynamic(&self) -> bool {
        true
    }

    #[inline]
    fn validate_input(&self, input: Value) -> Result<Value, Error> {
        Ok(input)
    }

    #[inline]
    fn execute(
        &self,
        input: Value,
        ctx: ToolCallContext,
    ) -> BoxFuture<Result<Value, Error>> {
        Box::pin(self.0.execute(input, ctx))
    }
}
