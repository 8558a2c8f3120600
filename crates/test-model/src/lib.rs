//! A local fake model for testing purpose.

mod preset;

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use pin_project_lite::pin_project;
use stepwise_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent, OpaqueMessage,
};
use tokio::time::{Instant, Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pin_project! {
    pub struct TestModelResponse {
        events: VecDeque<ModelResponseEvent>,
        delay: Duration,
        opaque_id: String,
        armed: bool,
        #[pin]
        sleep: Sleep,
    }
}

impl TestModelResponse {
    fn new(preset: &PresetResponse, delay: Duration, opaque_id: String) -> Self {
        let mut events: VecDeque<_> = preset
            .events
            .iter()
            .map(|event| match event {
                PresetEvent::MessageDelta(msg) => {
                    ModelResponseEvent::MessageDelta(msg.clone())
                }
                PresetEvent::ReasoningDelta(msg) => {
                    ModelResponseEvent::ReasoningDelta(msg.clone())
                }
                PresetEvent::ToolCall(req) => {
                    ModelResponseEvent::ToolCall(req.clone())
                }
                PresetEvent::Source(source) => {
                    ModelResponseEvent::Source(source.clone())
                }
            })
            .collect();
        if let Some(usage) = preset.usage {
            events.push_back(ModelResponseEvent::Usage(usage));
        }
        events.push_back(ModelResponseEvent::Completed(
            preset.resolved_finish_reason(),
        ));
        Self {
            events,
            delay,
            opaque_id,
            armed: false,
            sleep: sleep(Duration::ZERO),
        }
    }
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let mut this = self.project();
        if this.events.is_empty() {
            return Poll::Ready(Ok(None));
        }
        if !*this.armed {
            this.sleep.as_mut().reset(Instant::now() + *this.delay);
            *this.armed = true;
        }
        ready!(this.sleep.as_mut().poll(cx));
        *this.armed = false;
        Poll::Ready(Ok(this.events.pop_front()))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        Some(OpaqueMessage::new(self.opaque_id.clone(), self.opaque_id.clone()))
    }
}

#[derive(Default)]
struct ScriptState {
    next_response: usize,
    attempts: HashMap<usize, u64>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how the
/// model should respond. Each successful request consumes the next preset
/// response in order; once the script runs out, the fallback response (if
/// any) is used for every further request, otherwise an error is returned.
///
/// Clones share the script position and the recorded requests.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Vec<PresetResponse>,
    fallback: Option<PresetResponse>,
    delay: Option<Duration>,
    model_id: Option<String>,
    state: Arc<Mutex<ScriptState>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_response(&mut self, preset: PresetResponse) {
        self.script.push(preset);
    }

    /// Sets the response used after the script is exhausted.
    #[inline]
    pub fn set_fallback_response(&mut self, preset: PresetResponse) {
        self.fallback = Some(preset);
    }

    /// Sets the delay before each event of a response.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    #[inline]
    pub fn set_model_id<S: Into<String>>(&mut self, model_id: S) {
        self.model_id = Some(model_id.into());
    }

    /// Returns all requests received so far, including failed ones.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .clone()
    }

    fn next_response(
        &self,
        req: &ModelRequest,
    ) -> Result<TestModelResponse, Error> {
        let mut state =
            self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.requests.push(req.clone());

        let idx = state.next_response;
        let Some(preset) = self.script.get(idx).or(self.fallback.as_ref())
        else {
            return Err(Error {
                message: "no enough responses",
                kind: ErrorKind::Other,
            });
        };

        match preset.failures {
            Some(0) => {
                return Err(Error {
                    message: "preset failure",
                    kind: ErrorKind::Other,
                });
            }
            Some(failures) => {
                let attempts = state.attempts.entry(idx).or_default();
                if *attempts < failures {
                    *attempts += 1;
                    return Err(Error {
                        message: "preset failure",
                        kind: ErrorKind::RateLimitExceeded,
                    });
                }
            }
            None => {}
        }

        state.next_response += 1;
        let delay = self.delay.unwrap_or(Duration::from_millis(1));
        Ok(TestModelResponse::new(preset, delay, format!("msg:{idx}")))
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn model_id(&self) -> &str {
        self.model_id.as_deref().unwrap_or("test-model")
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.next_response(req))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use serde_json::json;
    use stepwise_model::{
        ModelFinishReason, ModelMessage, ModelTool, ToolCallRequest, Usage,
    };

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Option<ToolCallRequest>, ModelFinishReason, OpaqueMessage)
    {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_call = None;
        let mut finish_reason = None;
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await.unwrap()
        {
            match event {
                ModelResponseEvent::Completed(reason) => {
                    finish_reason = Some(reason)
                }
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_call = Some(req),
                _ => {}
            }
        }
        (
            msg,
            tool_call,
            finish_reason.unwrap(),
            resp.make_opaque_message().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Hello, ".to_owned()),
            PresetEvent::MessageDelta("world!".to_owned()),
        ]));
        provider.add_response(
            PresetResponse::with_events([
                PresetEvent::MessageDelta("Sure, ".to_owned()),
                PresetEvent::MessageDelta("let me take a ".to_owned()),
                PresetEvent::MessageDelta("look.".to_owned()),
                PresetEvent::tool_call(
                    "tool:1",
                    "read_file",
                    json!({ "filename": "todo.txt" }),
                ),
            ])
            .with_usage(Usage {
                input_tokens: Some(12),
                ..Default::default()
            }),
        );

        let mut req = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![ModelTool {
                name: "read_file".to_owned(),
                description: "Reads a file".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "filename": {
                            "type": "string",
                            "description": "The name of the file to read"
                        }
                    }
                }),
            }],
            ..Default::default()
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, _, finish_reason, opaque_msg) = collect_response(resp).await;
        assert_eq!(msg, "Hello, world!");
        assert_eq!(finish_reason, ModelFinishReason::Stop);
        assert_eq!(opaque_msg.id(), "msg:0");

        req.messages.push(ModelMessage::assistant_text(msg));
        req.messages
            .push(ModelMessage::User("Check my todo".to_owned()));
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_call, finish_reason, _) = collect_response(resp).await;
        assert_eq!(msg, "Sure, let me take a look.");
        assert_eq!(finish_reason, ModelFinishReason::ToolCalls);
        let tool_call = tool_call.unwrap();
        assert_eq!(tool_call.name, "read_file");
        assert_eq!(tool_call.arguments, r#"{"filename":"todo.txt"}"#);

        assert!(provider.send_request(&req).await.is_err());
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_failures_and_fallback() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::text("ok").with_failures(2));
        provider.set_fallback_response(PresetResponse::text("again"));

        let req = ModelRequest::default();
        for _ in 0..2 {
            let Err(err) = provider.send_request(&req).await else {
                panic!("expected a preset failure");
            };
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        let resp = provider.send_request(&req).await.unwrap();
        assert_eq!(collect_response(resp).await.0, "ok");

        for _ in 0..3 {
            let resp = provider.send_request(&req).await.unwrap();
            assert_eq!(collect_response(resp).await.0, "again");
        }
    }
}
