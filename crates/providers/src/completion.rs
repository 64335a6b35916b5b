//! Completion client: one streamed completion per call.
//!
//! Wraps a [`Provider`] with the request settings the agent loop needs and
//! turns its chunk stream into [`CompletionEvent`]s: zero or more text
//! deltas, then exactly one final assistant turn. The whole call, streaming
//! included, is bounded by a deadline.

use lexstream_config::AppConfig;
use lexstream_core::error::ProviderError;
use lexstream_core::message::{Message, MessageToolCall};
use lexstream_core::provider::{Provider, ProviderRequest, ToolDefinition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

/// One item of a completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// A fragment of assistant text, in generation order.
    Delta(String),
    /// The complete assistant turn. Always the last event of a successful call.
    Final(Message),
}

/// Receiving half of a completion stream.
pub type CompletionStream = mpsc::Receiver<Result<CompletionEvent, ProviderError>>;

/// Request settings shared by every completion.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl CompletionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            timeout: Duration::from_secs(config.agent.completion_timeout_secs),
        }
    }
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Streams completions from a provider.
pub struct CompletionClient {
    provider: Arc<dyn Provider>,
    settings: CompletionSettings,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>, settings: CompletionSettings) -> Self {
        Self { provider, settings }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }

    /// Request the next assistant turn for `turns`, with `system_prompt`
    /// prepended and `tools` offered to the model.
    ///
    /// Dropping the returned receiver abandons the call; nothing is retried.
    pub fn complete(
        &self,
        system_prompt: &str,
        turns: &[Message],
        tools: Vec<ToolDefinition>,
    ) -> CompletionStream {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend_from_slice(turns);

        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools,
            stream: true,
        };

        let (tx, rx) = mpsc::channel(64);
        let provider = Arc::clone(&self.provider);
        let limit = self.settings.timeout;

        tokio::spawn(async move {
            let outcome = drive(provider, request, limit, &tx).await;
            match outcome {
                Ok(Some(message)) => {
                    let _ = tx.send(Ok(CompletionEvent::Final(message))).await;
                }
                // Receiver dropped mid-stream
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Completion failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        rx
    }
}

/// Pump one provider stream. `Ok(None)` means the receiver went away.
async fn drive(
    provider: Arc<dyn Provider>,
    request: ProviderRequest,
    limit: Duration,
    tx: &mpsc::Sender<Result<CompletionEvent, ProviderError>>,
) -> Result<Option<Message>, ProviderError> {
    let deadline = Instant::now() + limit;
    let timed_out = || ProviderError::Timeout(limit.as_secs());

    debug!(provider = %provider.name(), model = %request.model, turns = request.messages.len(), "Requesting completion");

    let mut chunks = timeout_at(deadline, provider.stream(request))
        .await
        .map_err(|_| timed_out())??;

    let mut content = String::new();
    loop {
        let next = timeout_at(deadline, chunks.recv())
            .await
            .map_err(|_| timed_out())?;

        let Some(chunk) = next else {
            return Err(ProviderError::StreamInterrupted(
                "stream closed before the final chunk".into(),
            ));
        };
        let chunk = chunk?;

        if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
            content.push_str(&text);
            if tx.send(Ok(CompletionEvent::Delta(text))).await.is_err() {
                return Ok(None);
            }
        }

        if chunk.done {
            let message = Message::assistant_with_tools(content, chunk.tool_calls);
            validate(&message)?;
            return Ok(Some(message));
        }
    }
}

/// A final turn must carry text or tool calls, and every tool call must
/// name a tool and carry object arguments.
fn validate(message: &Message) -> Result<(), ProviderError> {
    if message.content.is_empty() && message.tool_calls.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "completion carried neither text nor tool calls".into(),
        ));
    }
    message.tool_calls.iter().try_for_each(validate_call)
}

fn validate_call(call: &MessageToolCall) -> Result<(), ProviderError> {
    if call.name.is_empty() {
        return Err(ProviderError::MalformedResponse(format!(
            "tool call {} has no name",
            call.id
        )));
    }
    match call.parsed_arguments() {
        Ok(serde_json::Value::Object(_)) => Ok(()),
        Ok(other) => Err(ProviderError::MalformedResponse(format!(
            "arguments of tool call {} are not an object: {other}",
            call.id
        ))),
        Err(e) => Err(ProviderError::MalformedResponse(format!(
            "arguments of tool call {} are not valid JSON: {e}",
            call.id
        ))),
    }
}
