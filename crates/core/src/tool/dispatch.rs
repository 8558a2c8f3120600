use std::future::ready;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use stepwise_model::ModelMessage;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::object::{BoxFuture, ToolObject};
use super::{Error, ToolCall, ToolCallContext, ToolResult, ToolSet};

/// Per-step inputs of the dispatcher.
#[derive(Clone, Debug)]
pub(crate) struct DispatchOptions {
    pub messages: Arc<[ModelMessage]>,
    pub context: Option<Arc<Value>>,
    pub cancellation: CancellationToken,
    /// Maximum number of tools running at the same time. Unbounded if
    /// not set.
    pub max_concurrency: Option<usize>,
}

/// Executes the tool calls of one step and returns one result per call,
/// in the order of `calls`.
///
/// Invalid calls are turned into error results without being executed.
/// Valid calls run concurrently, each on its own task, so that a failing
/// or panicking tool cannot affect the others.
pub(crate) async fn dispatch(
    calls: &[ToolCall],
    tools: &ToolSet,
    options: &DispatchOptions,
) -> Vec<ToolResult> {
    let span = debug_span!("tool dispatch", calls = calls.len());
    let limiter = options
        .max_concurrency
        .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

    let pending: Vec<_> = span.in_scope(|| {
        calls
            .iter()
            .map(|call| spawn_call(call, tools, options, limiter.clone()))
            .collect()
    });
    let results = join_all(pending).instrument(span).await;

    let failed = results.iter().filter(|r| r.is_error()).count();
    debug!("dispatched {} tool calls, {failed} failed", results.len());
    results
}

fn spawn_call(
    call: &ToolCall,
    tools: &ToolSet,
    options: &DispatchOptions,
    limiter: Option<Arc<Semaphore>>,
) -> BoxFuture<ToolResult> {
    if call.invalid {
        let err = call.error.clone().unwrap_or_else(Error::invalid_input);
        return Box::pin(ready(ToolResult::from_call(call, Err(err))));
    }
    let Some(tool) = tools.get(&call.tool_name).cloned() else {
        warn!("tool not found: {}", call.tool_name);
        let err = Error::no_such_tool()
            .with_reason(format!("tool `{}` is not available", call.tool_name));
        return Box::pin(ready(ToolResult::from_call(call, Err(err))));
    };

    let ctx = ToolCallContext {
        tool_call_id: call.id.clone(),
        messages: Arc::clone(&options.messages),
        context: options.context.clone(),
        cancellation: options.cancellation.clone(),
    };
    trace!("spawning a tool ({}) with args: {}", call.id, call.input);
    let task = tokio::spawn(
        execute_call(tool, call.input.clone(), ctx, limiter).instrument(
            debug_span!("tool", id = %call.id, name = %call.tool_name),
        ),
    );

    let call = call.clone();
    Box::pin(async move {
        let output = match task.await {
            Ok(output) => output,
            Err(err) => {
                error!("tool task ({}) failed: {err}", call.id);
                let reason = if err.is_panic() {
                    "the tool panicked"
                } else {
                    "the tool task was aborted"
                };
                Err(Error::execution_error().with_reason(reason))
            }
        };
        ToolResult::from_call(&call, output)
    })
}

async fn execute_call(
    tool: Arc<dyn ToolObject>,
    input: Value,
    ctx: ToolCallContext,
    limiter: Option<Arc<Semaphore>>,
) -> Result<Value, Error> {
    let cancellation = ctx.cancellation.clone();
    let work = async move {
        let _permit = match limiter {
            Some(limiter) => limiter.acquire_owned().await.ok(),
            None => None,
        };
        if let Err(err) = tool.on_input_available(&input, &ctx).await {
            warn!("on_input_available hook failed: {err}");
        }
        tool.execute(input, ctx).await
    };

    let output = tokio::select! {
        biased;
        _ = cancellation.cancelled() => {
            Err(Error::cancelled().with_reason("the run was cancelled"))
        }
        output = work => output,
    };
    match &output {
        Ok(_) => trace!("tool finished"),
        Err(err) => debug!("tool failed: {err}"),
    }
    output
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::{Stream, StreamExt, stream};
    use serde::Deserialize;
    use serde_json::json;
    use tokio::time::{Instant, sleep};

    use super::*;
    use crate::BoxError;
    use crate::tool::{ErrorKind, StreamingTool, Tool, ToolRegistry};

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct SleepInput {
        millis: u64,
        #[serde(default)]
        fail: bool,
        #[serde(default)]
        panic: bool,
    }

    #[derive(Default)]
    struct SleepTool {
        executions: Arc<AtomicUsize>,
        hook_fails: bool,
        hook_called: Arc<AtomicBool>,
    }

    impl Tool for SleepTool {
        type Input = SleepInput;
        type Output = Value;

        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "Sleeps for a while"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn on_input_available(
            &self,
            _input: &Value,
            _ctx: &ToolCallContext,
        ) -> impl Future<Output = Result<(), BoxError>> + Send + 'static {
            self.hook_called.store(true, Ordering::SeqCst);
            let fails = self.hook_fails;
            async move {
                if fails {
                    return Err("hook exploded".into());
                }
                Ok(())
            }
        }

        fn execute(
            &self,
            input: Self::Input,
            ctx: ToolCallContext,
        ) -> impl Future<Output = Result<Self::Output, Error>> + Send + 'static
        {
            let executions = Arc::clone(&self.executions);
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(input.millis)).await;
                if input.panic {
                    panic!("boom");
                }
                if input.fail {
                    return Err(Error::execution_error().with_reason("failed"));
                }
                Ok(json!({ "slept": input.millis, "id": ctx.tool_call_id }))
            }
        }
    }

    #[derive(Deserialize)]
    struct CountInput {
        to: u64,
        #[serde(default)]
        fail_at: Option<u64>,
    }

    /// Yields every number up to `to`.
    struct CountTool;

    impl StreamingTool for CountTool {
        type Input = CountInput;
        type Output = u64;

        fn name(&self) -> &str {
            "count"
        }

        fn description(&self) -> &str {
            "Counts up to a number"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
            _ctx: ToolCallContext,
        ) -> impl Stream<Item = Result<Self::Output, Error>> + Send + 'static
        {
            let fail_at = input.fail_at;
            stream::iter(1..=input.to).then(move |n| async move {
                sleep(Duration::from_millis(5)).await;
                if fail_at == Some(n) {
                    return Err(Error::execution_error()
                        .with_reason(format!("failed at {n}")));
                }
                Ok(n)
            })
        }
    }

    fn setup(tool: SleepTool) -> ToolSet {
        let mut registry = ToolRegistry::default();
        registry.add_tool(tool);
        registry.select(None)
    }

    fn options() -> DispatchOptions {
        DispatchOptions {
            messages: Arc::from(vec![]),
            context: None,
            cancellation: CancellationToken::new(),
            max_concurrency: None,
        }
    }

    fn call(id: &str, input: Value) -> ToolCall {
        ToolCall {
            id: id.to_owned(),
            tool_name: "sleep".to_owned(),
            input,
            dynamic: false,
            invalid: false,
            error: None,
        }
    }

    fn count_call(id: &str, input: Value) -> ToolCall {
        ToolCall {
            tool_name: "count".to_owned(),
            ..call(id, input)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_tool_keeps_last_output() {
        let mut registry = ToolRegistry::default();
        registry.add_tool(SleepTool::default());
        registry.add_streaming_tool(CountTool);
        let tools = registry.select(None);
        let calls = [
            count_call("a", json!({ "to": 3 })),
            count_call("b", json!({ "to": 3, "fail_at": 2 })),
            count_call("c", json!({ "to": 0 })),
            call("d", json!({ "millis": 1, "fail": true })),
        ];

        let results = dispatch(&calls, &tools, &options()).await;
        assert_eq!(results[0].output, Ok(json!(3)));
        assert_eq!(
            results[1].output,
            Err(Error::execution_error().with_reason("failed at 2"))
        );
        // Nothing yielded.
        assert_eq!(results[2].output, Ok(Value::Null));
        assert_eq!(
            results[3].output.as_ref().unwrap_err().kind(),
            ErrorKind::ExecutionError
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated() {
        let tools = setup(SleepTool::default());
        let calls = [
            call("a", json!({ "millis": 30 })),
            call("b", json!({ "millis": 10, "fail": true })),
            call("c", json!({ "millis": 20 })),
        ];

        let results = dispatch(&calls, &tools, &options()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].output, Ok(json!({ "slept": 30, "id": "a" })));
        assert_eq!(
            results[1].output.as_ref().unwrap_err().kind(),
            ErrorKind::ExecutionError
        );
        assert_eq!(results[2].output, Ok(json!({ "slept": 20, "id": "c" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_isolated() {
        let tools = setup(SleepTool::default());
        let calls = [
            call("a", json!({ "millis": 5, "panic": true })),
            call("b", json!({ "millis": 10 })),
        ];

        let results = dispatch(&calls, &tools, &options()).await;
        assert!(results[0].is_error());
        assert_eq!(results[1].output, Ok(json!({ "slept": 10, "id": "b" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_and_concurrency() {
        let tools = setup(SleepTool::default());
        let calls = [
            call("slow", json!({ "millis": 100 })),
            call("fast", json!({ "millis": 1 })),
        ];

        let start = Instant::now();
        let results = dispatch(&calls, &tools, &options()).await;
        assert!(start.elapsed() < Duration::from_millis(150));
        let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, ["slow", "fast"]);

        let start = Instant::now();
        let options = DispatchOptions {
            max_concurrency: Some(1),
            ..options()
        };
        let results = dispatch(&calls, &tools, &options).await;
        assert!(start.elapsed() >= Duration::from_millis(101));
        assert!(results.iter().all(|r| !r.is_error()));
    }

    #[tokio::test]
    async fn test_invalid_calls_are_not_executed() {
        let tool = SleepTool::default();
        let executions = Arc::clone(&tool.executions);
        let tools = setup(tool);

        let mut invalid = call("a", json!({ "millis": "soon" }));
        invalid.invalid = true;
        invalid.error = Some(Error::invalid_input().with_reason("bad millis"));
        let mut unknown = call("b", json!({}));
        unknown.tool_name = "wait".to_owned();

        let results = dispatch(&[invalid, unknown], &tools, &options()).await;
        assert_eq!(executions.load(Ordering::SeqCst), 0);
        assert_eq!(
            results[0].output,
            Err(Error::invalid_input().with_reason("bad millis"))
        );
        assert_eq!(
            results[1].output.as_ref().unwrap_err().kind(),
            ErrorKind::NoSuchTool
        );
    }

    #[tokio::test]
    async fn test_failing_hook_is_ignored() {
        let tool = SleepTool {
            hook_fails: true,
            ..Default::default()
        };
        let hook_called = Arc::clone(&tool.hook_called);
        let tools = setup(tool);

        let results =
            dispatch(&[call("a", json!({ "millis": 1 }))], &tools, &options())
                .await;
        assert!(hook_called.load(Ordering::SeqCst));
        assert!(!results[0].is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let tools = setup(SleepTool::default());
        let options = options();
        let token = options.cancellation.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let results = dispatch(
            &[
                call("a", json!({ "millis": 1 })),
                call("b", json!({ "millis": 1000 })),
            ],
            &tools,
            &options,
        )
        .await;
        assert!(!results[0].is_error());
        assert_eq!(
            results[1].output.as_ref().unwrap_err().kind(),
            ErrorKind::Cancelled
        );
    }
}
