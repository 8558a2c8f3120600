use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use stepwise_model::{ModelMessage, ModelTool, ToolCallRequest};

use super::{Error, ToolCall, ToolSet};
use crate::BoxError;

/// Arguments of a [`RepairToolCall`] invocation.
#[derive(Debug)]
pub struct RepairInput<'a> {
    /// The tool call that failed to parse.
    pub tool_call: &'a ToolCallRequest,
    /// Definitions of the tools active in this step.
    pub tools: &'a [ModelTool],
    /// Why the tool call failed to parse.
    pub error: &'a Error,
    /// The messages sent to the model in this step.
    pub messages: &'a [ModelMessage],
}

/// Tries to fix a tool call that failed to parse, e.g. by asking a model
/// to rewrite the arguments against the schema.
///
/// A repair is attempted once per invalid call. If the repaired call fails
/// to parse again, it's not repaired a second time.
#[async_trait]
pub trait RepairToolCall: Send + Sync {
    /// Returns a replacement call, or `None` to give up.
    ///
    /// The replacement keeps the identifier of the original call, whatever
    /// identifier it carries.
    async fn repair(
        &self,
        input: RepairInput<'_>,
    ) -> Result<Option<ToolCallRequest>, BoxError>;
}

/// Parses the tool call requests of one step, in order.
pub(crate) async fn parse_tool_calls(
    requests: &[ToolCallRequest],
    tools: &ToolSet,
    repair: Option<&dyn RepairToolCall>,
    messages: &[ModelMessage],
) -> Vec<ToolCall> {
    let parse_futs = requests
        .iter()
        .map(|req| parse_tool_call(req, tools, repair, messages));
    join_all(parse_futs).await
}

async fn parse_tool_call(
    req: &ToolCallRequest,
    tools: &ToolSet,
    repair: Option<&dyn RepairToolCall>,
    messages: &[ModelMessage],
) -> ToolCall {
    let error = match validate_request(req, tools) {
        Ok(call) => return call,
        Err(err) => err,
    };
    warn!("invalid tool call ({}) to `{}`: {error}", req.id, req.name);

    let Some(repair) = repair else {
        return invalid_call(req, tools, error);
    };
    let definitions = tools.definitions();
    let repaired = repair
        .repair(RepairInput {
            tool_call: req,
            tools: &definitions,
            error: &error,
            messages,
        })
        .await;

    match repaired {
        Ok(Some(mut repaired)) => {
            repaired.id.clone_from(&req.id);
            trace!("repaired tool call: {repaired:?}");
            match validate_request(&repaired, tools) {
                Ok(call) => {
                    debug!("tool call ({}) repaired", req.id);
                    call
                }
                Err(err) => {
                    warn!("repaired tool call ({}) is still invalid: {err}", req.id);
                    invalid_call(req, tools, err)
                }
            }
        }
        Ok(None) => {
            debug!("tool call ({}) was not repaired", req.id);
            invalid_call(req, tools, error)
        }
        Err(err) => {
            warn!("failed to repair tool call ({}): {err}", req.id);
            invalid_call(req, tools, error)
        }
    }
}

fn validate_request(
    req: &ToolCallRequest,
    tools: &ToolSet,
) -> Result<ToolCall, Error> {
    let Some(tool) = tools.get(&req.name) else {
        let available: Vec<_> = tools.names().collect();
        return Err(Error::no_such_tool().with_reason(format!(
            "tool `{}` is not available, available tools: [{}]",
            req.name,
            available.join(", ")
        )));
    };

    let input = parse_arguments(&req.arguments).map_err(|err| {
        Error::invalid_input()
            .with_reason(format!("arguments are not valid JSON: {err}"))
    })?;
    validate_with_schema(tool.parameter_schema(), &input)?;
    let input = tool.validate_input(input)?;

    Ok(ToolCall {
        id: req.id.clone(),
        tool_name: req.name.clone(),
        input,
        dynamic: tool.is_dynamic(),
        invalid: false,
        error: None,
    })
}

fn invalid_call(
    req: &ToolCallRequest,
    tools: &ToolSet,
    error: Error,
) -> ToolCall {
    let dynamic = tools.get(&req.name).is_none_or(|tool| tool.is_dynamic());
    ToolCall {
        id: req.id.clone(),
        tool_name: req.name.clone(),
        input: lenient_input(&req.arguments),
        dynamic,
        invalid: true,
        error: Some(error),
    }
}

/// Empty arguments are treated as an empty object, since some providers
/// omit them for tools without parameters.
fn parse_arguments(arguments: &str) -> Result<Value, serde_json::Error> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments)
}

pub(crate) fn lenient_input(arguments: &str) -> Value {
    parse_arguments(arguments)
        .unwrap_or_else(|_| Value::String(arguments.to_owned()))
}

fn validate_with_schema(schema: &Value, instance: &Value) -> Result<(), Error> {
    if !schema.is_object() {
        return Ok(());
    }
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(err) => {
            warn!("invalid tool schema: {err}");
            return Ok(());
        }
    };
    let messages: Vec<_> = validator
        .iter_errors(instance)
        .take(3)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        return Ok(());
    }
    Err(Error::invalid_input().with_reason(format!(
        "arguments failed schema validation: {}",
        messages.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use std::future::ready;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::tool::{
        DynamicTool, ErrorKind, Tool, ToolCallContext, ToolRegistry,
    };

    #[derive(Deserialize)]
    struct WeatherInput {
        city: String,
    }

    struct WeatherTool {
        schema: Value,
    }

    impl WeatherTool {
        fn new() -> Self {
            Self {
                schema: json!({
                    "type": "object",
                    "properties": { "city": { "type": "string" } },
                    "required": ["city"]
                }),
            }
        }
    }

    impl Tool for WeatherTool {
        type Input = WeatherInput;
        type Output = String;

        fn name(&self) -> &str {
            "weather"
        }

        fn description(&self) -> &str {
            "Gets the weather of a city"
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn validate_input(&self, mut input: Value) -> Result<Value, Error> {
            if let Some(city) = input.get_mut("city") {
                *city = Value::String(
                    city.as_str().unwrap_or_default().trim().to_owned(),
                );
            }
            Ok(input)
        }

        fn execute(
            &self,
            input: Self::Input,
            _ctx: ToolCallContext,
        ) -> impl Future<Output = Result<Self::Output, Error>> + Send + 'static
        {
            ready(Ok(format!("sunny in {}", input.city)))
        }
    }

    struct Lookup;

    impl DynamicTool for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }

        fn description(&self) -> &str {
            "Looks things up"
        }

        fn parameter_schema(&self) -> &Value {
            static SCHEMA: std::sync::LazyLock<Value> =
                std::sync::LazyLock::new(|| json!({ "type": "object" }));
            &SCHEMA
        }

        fn execute(
            &self,
            input: Value,
            _ctx: ToolCallContext,
        ) -> impl Future<Output = Result<Value, Error>> + Send + 'static {
            ready(Ok(input))
        }
    }

    fn tools() -> ToolSet {
        let mut registry = ToolRegistry::default();
        registry.add_tool(WeatherTool::new());
        registry.add_dynamic_tool(Lookup);
        registry.select(None)
    }

    fn request(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments: arguments.to_owned(),
        }
    }

    /// Replaces the arguments with a fixed value and counts invocations.
    struct FixedRepair {
        arguments: Option<&'static str>,
        calls: AtomicUsize,
        seen_errors: Mutex<Vec<ErrorKind>>,
    }

    impl FixedRepair {
        fn new(arguments: Option<&'static str>) -> Self {
            Self {
                arguments,
                calls: AtomicUsize::new(0),
                seen_errors: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl RepairToolCall for FixedRepair {
        async fn repair(
            &self,
            input: RepairInput<'_>,
        ) -> Result<Option<ToolCallRequest>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_errors.lock().unwrap().push(input.error.kind());
            Ok(self.arguments.map(|arguments| ToolCallRequest {
                id: "ignored".to_owned(),
                name: input.tool_call.name.clone(),
                arguments: arguments.to_owned(),
            }))
        }
    }

    struct FailingRepair;

    #[async_trait]
    impl RepairToolCall for FailingRepair {
        async fn repair(
            &self,
            _input: RepairInput<'_>,
        ) -> Result<Option<ToolCallRequest>, BoxError> {
            Err("repair model unavailable".into())
        }
    }

    #[tokio::test]
    async fn test_valid_calls() {
        let tools = tools();
        let calls = parse_tool_calls(
            &[
                request("1", "weather", r#"{"city":"  Paris "}"#),
                request("2", "lookup", r#"{"q":"rust"}"#),
                request("3", "lookup", ""),
            ],
            &tools,
            None,
            &[],
        )
        .await;

        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|call| !call.invalid));
        assert_eq!(calls[0].input, json!({ "city": "Paris" }));
        assert!(!calls[0].dynamic);
        assert!(calls[1].dynamic);
        assert_eq!(calls[2].input, json!({}));
    }

    #[tokio::test]
    async fn test_invalid_calls() {
        let tools = tools();
        let calls = parse_tool_calls(
            &[
                request("1", "weather", r#"{"town":"Paris"}"#),
                request("2", "weather", "{not json"),
                request("3", "teleport", "{}"),
            ],
            &tools,
            None,
            &[],
        )
        .await;

        assert!(calls.iter().all(|call| call.invalid));
        let kinds: Vec<_> = calls
            .iter()
            .map(|call| call.error.as_ref().unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            [
                ErrorKind::InvalidInput,
                ErrorKind::InvalidInput,
                ErrorKind::NoSuchTool
            ]
        );
        assert!(!calls[0].dynamic);
        assert_eq!(calls[1].input, json!("{not json"));
        assert!(calls[2].dynamic);
        assert!(calls[2].error.as_ref().unwrap().reason().contains("weather"));
    }

    #[tokio::test]
    async fn test_repair_once() {
        let tools = tools();

        let repair = FixedRepair::new(Some(r#"{"city":"Oslo"}"#));
        let calls = parse_tool_calls(
            &[request("1", "weather", r#"{"town":"Oslo"}"#)],
            &tools,
            Some(&repair),
            &[],
        )
        .await;
        assert!(!calls[0].invalid);
        assert_eq!(calls[0].id, "1");
        assert_eq!(calls[0].input, json!({ "city": "Oslo" }));
        assert_eq!(
            *repair.seen_errors.lock().unwrap(),
            [ErrorKind::InvalidInput]
        );

        // A repaired call that is still invalid is not repaired again.
        let repair = FixedRepair::new(Some(r#"{"town":"Oslo"}"#));
        let calls = parse_tool_calls(
            &[request("1", "weather", r#"{"town":"Oslo"}"#)],
            &tools,
            Some(&repair),
            &[],
        )
        .await;
        assert!(calls[0].invalid);
        assert_eq!(repair.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repair_gives_up() {
        let tools = tools();
        let original = request("1", "weather", "{}");

        let repair = FixedRepair::new(None);
        let calls =
            parse_tool_calls(&[original.clone()], &tools, Some(&repair), &[])
                .await;
        assert!(calls[0].invalid);
        assert_eq!(
            calls[0].error.as_ref().unwrap().kind(),
            ErrorKind::InvalidInput
        );

        let calls =
            parse_tool_calls(&[original], &tools, Some(&FailingRepair), &[])
                .await;
        assert!(calls[0].invalid);
        assert_eq!(
            calls[0].error.as_ref().unwrap().kind(),
            ErrorKind::InvalidInput
        );
    }
}
