use std::fmt::{self, Debug};
use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use stepwise_model::{
    ContentPart, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
    ToolCallPart, ToolCallRequest, Usage,
};
use tracing::Instrument;

use crate::tool::lenient_input;

/// Callback receiving every event of a model response as it streams in.
pub type ChunkCallback = Arc<dyn Fn(&ModelResponseEvent) + Send + Sync>;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Option<ChunkCallback>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
///
/// Cloning is cheap, clones share the same provider.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    model_id: Arc<str>,
}

impl ModelClient {
    /// Wraps a model provider.
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        let model_id = Arc::from(provider.model_id());
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_chunk| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_chunk).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            model_id,
        }
    }

    /// Returns the identifier of the wrapped model.
    #[inline]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Sends a request and returns the complete response, retrying
    /// transient errors according to `retry`.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub(crate) async fn send_request(
        &self,
        req: ModelRequest,
        on_chunk: Option<ChunkCallback>,
        retry: &RetryPolicy,
    ) -> SendRequestResult {
        let mut backoff = retry.backoff();
        let mut retries = 0;
        loop {
            let result = (self.handler_fn)(req.clone(), on_chunk.clone()).await;
            let err = match result {
                Ok(resp) => return Ok(resp),
                Err(err) => err,
            };
            if !err.kind().is_transient() || retries >= retry.max_retries {
                return Err(err);
            }
            let Some(delay) = backoff.next_backoff() else {
                return Err(err);
            };
            retries += 1;
            warn!(
                "model request failed ({err}), retry {retries}/{} in {delay:?}",
                retry.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl Debug for ModelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClient")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

/// How transient model errors are retried.
///
/// Only errors whose kind is transient (rate limits) are retried.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of the delay between retries.
    pub max_interval: Duration,
    /// Factor applied to the delay after each retry.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[inline]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default)]
pub(crate) struct ModelClientResponse {
    /// Content in the order the model produced it. Tool call parts carry
    /// the leniently parsed arguments.
    pub parts: Vec<ContentPart>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
    pub usage: Usage,
    pub opaque: Option<OpaqueMessage>,
}

impl ModelClientResponse {
    fn push_text(&mut self, delta: String) {
        if let Some(ContentPart::Text { text }) = self.parts.last_mut() {
            text.push_str(&delta);
        } else {
            self.parts.push(ContentPart::Text { text: delta });
        }
    }

    fn push_reasoning(&mut self, delta: String) {
        if let Some(ContentPart::Reasoning { text }) = self.parts.last_mut() {
            text.push_str(&delta);
        } else {
            self.parts.push(ContentPart::Reasoning { text: delta });
        }
    }
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_chunk: Option<ChunkCallback>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut collected = ModelClientResponse::default();

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            // The request has been handled gracefully without errors,
            // now try getting the opaque message for this response.
            collected.opaque = pinned_resp.make_opaque_message();
            break;
        };
        trace!("got an event: {event:?}");
        if let Some(on_chunk) = &on_chunk {
            on_chunk(&event);
        }

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                collected.push_text(delta);
            }
            ModelResponseEvent::ReasoningDelta(delta) => {
                collected.push_reasoning(delta);
            }
            ModelResponseEvent::ToolCall(req) => {
                collected.parts.push(ContentPart::ToolCall(ToolCallPart {
                    id: req.id.clone(),
                    name: req.name.clone(),
                    input: lenient_input(&req.arguments),
                }));
                collected.tool_calls.push(req);
            }
            ModelResponseEvent::File(file) => {
                collected.parts.push(ContentPart::File(file));
            }
            ModelResponseEvent::Source(source) => {
                collected.parts.push(ContentPart::Source(source));
            }
            ModelResponseEvent::Usage(usage) => {
                collected.usage += usage;
            }
            ModelResponseEvent::Completed(reason) => {
                collected.finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use stepwise_model::{ErrorKind, ModelMessage};
    use stepwise_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(
            PresetResponse::with_events([
                PresetEvent::ReasoningDelta("The user ".to_owned()),
                PresetEvent::ReasoningDelta("greets.".to_owned()),
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are you?".to_owned()),
                PresetEvent::tool_call("call_1", "wave", json!({ "times": 2 })),
            ])
            .with_usage(Usage {
                input_tokens: Some(3),
                ..Default::default()
            }),
        );

        let model_client = ModelClient::new(model_provider);
        assert_eq!(model_client.model_id(), "test-model");

        let chunks = Arc::new(Mutex::new(0));
        let on_chunk: ChunkCallback = {
            let chunks = Arc::clone(&chunks);
            Arc::new(move |_: &ModelResponseEvent| *chunks.lock().unwrap() += 1)
        };
        let resp = model_client
            .send_request(request(), Some(on_chunk), &RetryPolicy::none())
            .await
            .unwrap();

        assert_eq!(
            resp.parts,
            [
                ContentPart::Reasoning {
                    text: "The user greets.".to_owned()
                },
                ContentPart::text("How are you?"),
                ContentPart::ToolCall(ToolCallPart {
                    id: "call_1".to_owned(),
                    name: "wave".to_owned(),
                    input: json!({ "times": 2 }),
                }),
            ]
        );
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.finish_reason, Some(ModelFinishReason::ToolCalls));
        assert_eq!(resp.usage.input_tokens, Some(3));
        assert!(resp.opaque.is_some());
        // 5 content events, usage, completion.
        assert_eq!(*chunks.lock().unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_errors() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::text("ok").with_failures(2));
        let model_client = ModelClient::new(model_provider.clone());

        let resp = model_client
            .send_request(request(), None, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(resp.parts, [ContentPart::text("ok")]);
        assert_eq!(model_provider.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::text("ok").with_failures(5));
        let model_client = ModelClient::new(model_provider.clone());

        let err = model_client
            .send_request(request(), None, &RetryPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(model_provider.requests().len(), 3);

        // Permanent errors are not retried at all.
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::text("ok").with_failures(0));
        let model_client = ModelClient::new(model_provider.clone());
        let err = model_client
            .send_request(request(), None, &RetryPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(model_provider.requests().len(), 1);
    }
}
