//! Request, response and result models for the chat and generate endpoints.

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::client::ClientError;
use crate::options::Options;

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            function: ToolCallFunction {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// A tool the model may call, described by a JSON schema for its parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A single turn in a conversation.
///
/// `images` holds base64-encoded image data exactly as it goes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            tool_calls: None,
        }
    }

    /// True when the message carries something besides text.
    pub fn has_attachments(&self) -> bool {
        !self.images.is_empty() || self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// A chat request as sent to `/api/chat`.
///
/// Usually produced by [`ChatRequestBuilder`](crate::builder::ChatRequestBuilder).
/// `options` is always serialized, as `{}` when empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatRequest {
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(default)]
    pub options: Options,

    #[serde(default)]
    pub stream: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,

    /// `"json"` or a JSON schema the reply must conform to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

/// A stateless generation request as sent to `/api/generate`.
///
/// # Example
/// ```rust
/// use ollama_chat::model::GenerateRequest;
///
/// let request = GenerateRequest::new("llama3", "Why is the sky blue?")
///     .with_system("Answer in one sentence.")
///     .with_keep_alive("5m");
/// assert!(!request.raw);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GenerateRequest {
    pub model: String,

    pub prompt: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    #[serde(default)]
    pub options: Options,

    #[serde(default)]
    pub stream: bool,

    /// Send the prompt without applying the model's template
    #[serde(default)]
    pub raw: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,

    /// Context returned by a previous generation, for short conversational memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Replace the generation options.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Attach already base64-encoded images.
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Send the prompt verbatim, bypassing the model's template.
    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Set the system prompt, overriding the one in the Modelfile.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the prompt template, overriding the one in the Modelfile.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// How long the model stays loaded after the request, e.g. `"5m"`.
    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    /// Constrain the reply to `"json"` or a JSON schema.
    pub fn with_format(mut self, format: Value) -> Self {
        self.format = Some(format);
        self
    }

    /// Continue from the context returned by an earlier generation.
    pub fn with_context(mut self, context: Vec<i64>) -> Self {
        self.context = Some(context);
        self
    }
}

/// An embeddings request as sent to `/api/embeddings`.
///
/// Usually produced by [`EmbeddingsRequestBuilder`](crate::builder::EmbeddingsRequestBuilder).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EmbeddingsRequest {
    pub model: String,

    pub prompt: String,

    #[serde(default)]
    pub options: Options,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

/// Timing and token statistics reported with the final response.
///
/// Durations are in nanoseconds, as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

impl Statistics {
    pub(crate) fn into_option(self) -> Option<Self> {
        if self == Statistics::default() {
            None
        } else {
            Some(self)
        }
    }
}

/// One incremental piece of a streamed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    /// Text produced since the previous fragment
    pub text: String,

    /// Set on the last fragment of a stream
    pub done: bool,

    /// Final statistics, present on the terminal fragment
    pub stats: Option<Statistics>,

    pub tool_calls: Option<Vec<ToolCall>>,

    /// Generation context, present on the terminal fragment of a generate stream
    pub context: Option<Vec<i64>>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn done(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: true,
            ..Default::default()
        }
    }
}

// --- Wire response types ---

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ResponseMessage {
    pub(crate) fn into_message(self) -> Message {
        Message {
            role: self.role.unwrap_or(Role::Assistant),
            content: self.content,
            images: self.images.unwrap_or_default(),
            tool_calls: self.tool_calls,
        }
    }
}

/// A `/api/chat` response object, or one record of a chat stream.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub stats: Statistics,
}

impl ChatResponse {
    pub(crate) fn into_fragment(self) -> Result<Fragment, ClientError> {
        if let Some(error) = self.error {
            return Err(ClientError::StreamingFailure(error));
        }
        let (text, tool_calls) = match self.message {
            Some(message) => (message.content, message.tool_calls),
            None => (String::new(), None),
        };
        Ok(Fragment {
            text,
            done: self.done,
            stats: if self.done { self.stats.into_option() } else { None },
            tool_calls,
            context: None,
        })
    }
}

/// A `/api/generate` response object, or one record of a generate stream.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub context: Option<Vec<i64>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub stats: Statistics,
}

impl GenerateResponse {
    pub(crate) fn into_fragment(self) -> Result<Fragment, ClientError> {
        if let Some(error) = self.error {
            return Err(ClientError::StreamingFailure(error));
        }
        Ok(Fragment {
            text: self.response,
            done: self.done,
            stats: if self.done { self.stats.into_option() } else { None },
            tool_calls: None,
            context: self.context,
        })
    }
}

/// A `/api/embeddings` response object.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EmbeddingsResponse {
    #[serde(default)]
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

// --- Results ---

/// Outcome of a chat exchange.
///
/// The history is the request's messages followed by the assistant reply, so it
/// always ends with the most recent assistant turn.
#[derive(Debug, Clone)]
pub struct ChatResult {
    response: String,
    history: NonEmpty<Message>,
    stats: Option<Statistics>,
    response_time: Duration,
}

impl ChatResult {
    pub(crate) fn new(
        messages: Vec<Message>,
        reply: Message,
        stats: Option<Statistics>,
        response_time: Duration,
    ) -> Self {
        let response = reply.content.clone();
        let history = match NonEmpty::from_vec(messages) {
            Some(mut history) => {
                history.push(reply);
                history
            }
            None => NonEmpty::new(reply),
        };
        Self {
            response,
            history,
            stats,
            response_time,
        }
    }

    /// Full response text, untrimmed.
    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn history(&self) -> &NonEmpty<Message> {
        &self.history
    }

    /// The assistant reply that closed this exchange.
    pub fn reply(&self) -> &Message {
        self.history.last()
    }

    pub fn stats(&self) -> Option<&Statistics> {
        self.stats.as_ref()
    }

    pub fn response_time(&self) -> Duration {
        self.response_time
    }

    /// Take the history, ready to be fed back through `with_messages`.
    pub fn into_history(self) -> Vec<Message> {
        self.history.into()
    }
}

/// Outcome of a one-shot generation. Carries no conversation history.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    response: String,
    stats: Option<Statistics>,
    context: Option<Vec<i64>>,
    response_time: Duration,
}

impl GenerateResult {
    pub(crate) fn new(
        response: String,
        stats: Option<Statistics>,
        context: Option<Vec<i64>>,
        response_time: Duration,
    ) -> Self {
        Self {
            response,
            stats,
            context,
            response_time,
        }
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn stats(&self) -> Option<&Statistics> {
        self.stats.as_ref()
    }

    pub fn context(&self) -> Option<&[i64]> {
        self.context.as_deref()
    }

    pub fn response_time(&self) -> Duration {
        self.response_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_omits_empty_attachments() {
        let message = Message::new(Role::User, "hello");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "role": "user", "content": "hello" })
        );
        assert!(!message.has_attachments());
    }

    #[test]
    fn test_message_with_tool_calls() {
        let mut message = Message::new(Role::Assistant, "");
        message.tool_calls = Some(vec![ToolCall::new(
            "get_weather",
            json!({ "city": "Paris" }),
        )]);

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["tool_calls"][0]["function"]["name"], json!("get_weather"));
        assert_eq!(value["tool_calls"][0]["function"]["arguments"]["city"], json!("Paris"));
        assert!(message.has_attachments());

        let decoded: Message = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_chat_request_serializes_empty_options() {
        let request = ChatRequest {
            model: "m".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            json!({ "model": "m", "messages": [], "options": {}, "stream": false })
        );
    }

    #[test]
    fn test_generate_request_round_trip() {
        let request = GenerateRequest::new("m", "Why?")
            .with_raw(true)
            .with_template("{{ .Prompt }}")
            .with_format(json!("json"))
            .with_context(vec![4, 5])
            .with_images(vec!["aGk=".to_string()]);

        let json = serde_json::to_string(&request).unwrap();
        let decoded: GenerateRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_chat_response_final_record() {
        let response: ChatResponse = serde_json::from_value(json!({
            "model": "llama3",
            "created_at": "2024-05-01T10:00:00Z",
            "message": { "role": "assistant", "content": "" },
            "done": true,
            "done_reason": "stop",
            "total_duration": 5_000_000_000u64,
            "eval_count": 12
        }))
        .unwrap();

        let fragment = response.into_fragment().unwrap();
        assert!(fragment.done);
        let stats = fragment.stats.unwrap();
        assert_eq!(stats.total_duration, Some(5_000_000_000));
        assert_eq!(stats.eval_count, Some(12));
    }

    #[test]
    fn test_chat_response_partial_record_without_role() {
        let response: ChatResponse =
            serde_json::from_value(json!({ "message": { "content": "Par" }, "done": false }))
                .unwrap();

        let fragment = response.into_fragment().unwrap();
        assert_eq!(fragment, Fragment::text("Par"));
    }

    #[test]
    fn test_error_record_becomes_streaming_failure() {
        let response: GenerateResponse =
            serde_json::from_value(json!({ "error": "unexpected EOF" })).unwrap();
        assert!(matches!(
            response.into_fragment(),
            Err(ClientError::StreamingFailure(ref m)) if m == "unexpected EOF"
        ));
    }

    #[test]
    fn test_embeddings_request_wire_shape() {
        let request = EmbeddingsRequest {
            model: "nomic-embed-text".to_string(),
            prompt: "What is the capital of France?".to_string(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "nomic-embed-text",
                "prompt": "What is the capital of France?",
                "options": {}
            })
        );

        let response: EmbeddingsResponse =
            serde_json::from_value(json!({ "embedding": [0.5, -1, 2.25] })).unwrap();
        assert_eq!(response.embedding, vec![0.5, -1.0, 2.25]);
        assert!(response.error.is_none());
    }

    #[test]
    fn test_chat_result_history_ends_with_reply() {
        let result = ChatResult::new(
            vec![
                Message::new(Role::System, "Be brief."),
                Message::new(Role::User, "Hi"),
            ],
            Message::new(Role::Assistant, " Hello! "),
            None,
            Duration::from_millis(3),
        );

        assert_eq!(result.history().len(), 3);
        assert_eq!(result.reply().role, Role::Assistant);
        assert_eq!(result.response(), " Hello! ");
        assert_eq!(result.into_history().len(), 3);
    }

    #[test]
    fn test_chat_result_without_prior_messages() {
        let result = ChatResult::new(
            Vec::new(),
            Message::new(Role::Assistant, "templated"),
            None,
            Duration::ZERO,
        );
        assert_eq!(result.history().len(), 1);
    }
}
