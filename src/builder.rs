//! Request builders: chat conversations and embeddings.

use schemars::JsonSchema;
use serde_json::Value;

use crate::client::{validate_model, ClientError};
use crate::image::ImageSource;
use crate::model::{ChatRequest, EmbeddingsRequest, Message, Role, Tool, ToolCall};
use crate::options::Options;

/// A message plus the image sources still to be resolved for it.
#[derive(Debug, Clone)]
struct Turn {
    message: Message,
    attachments: Vec<ImageSource>,
}

/// Accumulates messages, options and flags into [`ChatRequest`] snapshots.
///
/// The builder owns the conversation. [`build`](Self::build) deep-copies it, so a
/// snapshot is never affected by later mutation or [`reset`](Self::reset).
/// A builder is a single-writer object; use one per conversation.
///
/// # Example
/// ```rust,no_run
/// use ollama_chat::builder::ChatRequestBuilder;
/// use ollama_chat::client::OllamaClient;
/// use ollama_chat::model::Role;
/// use ollama_chat::options::TransportOptions;
///
/// # async fn run() -> Result<(), ollama_chat::ClientError> {
/// let client = OllamaClient::new(TransportOptions::default())?;
/// let mut builder = ChatRequestBuilder::new("llama3")?;
///
/// let request = builder
///     .with_message(Role::User, "What is the capital of France?")
///     .build()
///     .await?;
/// let first = client.chat(request).await?;
///
/// builder.reset();
/// let request = builder
///     .with_messages(first.into_history())
///     .with_message(Role::User, "And the second largest city?")
///     .build()
///     .await?;
/// let second = client.chat(request).await?;
/// assert_eq!(second.history().len(), 4);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChatRequestBuilder {
    model: String,
    turns: Vec<Turn>,
    options: Options,
    stream: bool,
    template: Option<String>,
    keep_alive: Option<String>,
    format: Option<Value>,
    tools: Vec<Tool>,
    error: Option<String>,
    http: reqwest::Client,
}

impl ChatRequestBuilder {
    /// Create a builder bound to `model`.
    pub fn new(model: impl Into<String>) -> Result<Self, ClientError> {
        let model = model.into();
        validate_model(&model)?;
        Ok(Self {
            model,
            turns: Vec::new(),
            options: Options::default(),
            stream: false,
            template: None,
            keep_alive: None,
            format: None,
            tools: Vec::new(),
            error: None,
            http: reqwest::Client::new(),
        })
    }

    /// Use `http` to fetch remote image attachments.
    pub fn with_http_client(&mut self, http: reqwest::Client) -> &mut Self {
        self.http = http;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Number of messages currently in the conversation.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a text message.
    pub fn with_message(&mut self, role: Role, content: impl Into<String>) -> &mut Self {
        self.push_turn(Message::new(role, content), Vec::new())
    }

    /// Append a message with image attachments, resolved when the request is built.
    pub fn with_message_images(
        &mut self,
        role: Role,
        content: impl Into<String>,
        images: Vec<ImageSource>,
    ) -> &mut Self {
        self.push_turn(Message::new(role, content), images)
    }

    /// Append a message carrying tool calls, typically an assistant turn being replayed.
    pub fn with_tool_calls_message(
        &mut self,
        role: Role,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> &mut Self {
        let mut message = Message::new(role, content);
        message.tool_calls = Some(tool_calls);
        self.push_turn(message, Vec::new())
    }

    /// Append a previously returned history unchanged.
    pub fn with_messages(&mut self, history: impl IntoIterator<Item = Message>) -> &mut Self {
        self.turns.extend(history.into_iter().map(|message| Turn {
            message,
            attachments: Vec::new(),
        }));
        self
    }

    /// Merge options into the pending set; later values win per key.
    pub fn with_options(&mut self, options: Options) -> &mut Self {
        self.options.merge(&options);
        self
    }

    pub fn with_template(&mut self, template: impl Into<String>) -> &mut Self {
        self.template = Some(template.into());
        self
    }

    /// How long the model stays loaded after the request, e.g. `"5m"`.
    pub fn with_keep_alive(&mut self, keep_alive: impl Into<String>) -> &mut Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    pub fn with_streaming(&mut self) -> &mut Self {
        self.stream = true;
        self
    }

    /// Constrain the reply to the given JSON schema.
    pub fn with_response_schema(&mut self, schema: Value) -> &mut Self {
        self.format = Some(schema);
        self
    }

    /// Constrain the reply to the JSON schema of `T`.
    pub fn with_response_schema_for<T: JsonSchema>(&mut self) -> &mut Self {
        match serde_json::to_value(schemars::schema_for!(T)) {
            Ok(schema) => self.format = Some(schema),
            Err(e) => self.record_error(format!("could not encode response schema: {}", e)),
        }
        self
    }

    /// Ask for any well-formed JSON reply.
    pub fn with_json_format(&mut self) -> &mut Self {
        self.format = Some(Value::String("json".to_string()));
        self
    }

    pub fn with_tools(&mut self, tools: Vec<Tool>) -> &mut Self {
        self.tools = tools;
        self
    }

    /// Clear the conversation, options and optional fields. The model is kept.
    pub fn reset(&mut self) -> &mut Self {
        self.turns.clear();
        self.options = Options::default();
        self.stream = false;
        self.template = None;
        self.keep_alive = None;
        self.format = None;
        self.tools.clear();
        self.error = None;
        self
    }

    /// Validate and produce an independent request snapshot.
    ///
    /// Options holding a NaN or infinite float fail with [`ClientError::InvalidArgument`].
    /// Image attachments are read or fetched here; the first one that cannot be
    /// resolved fails the build with [`ClientError::ImageResolution`].
    pub async fn build(&self) -> Result<ChatRequest, ClientError> {
        validate_model(&self.model)?;
        if let Some(reason) = &self.error {
            return Err(ClientError::InvalidArgument(reason.clone()));
        }
        self.options.validate()?;

        let mut messages = Vec::with_capacity(self.turns.len());
        for turn in &self.turns {
            let mut message = turn.message.clone();
            for source in &turn.attachments {
                message.images.push(source.resolve_to_base64(&self.http).await?);
            }
            messages.push(message);
        }

        Ok(ChatRequest {
            model: self.model.clone(),
            messages,
            options: self.options.clone(),
            stream: self.stream,
            template: self.template.clone(),
            keep_alive: self.keep_alive.clone(),
            format: self.format.clone(),
            tools: self.tools.clone(),
        })
    }

    fn push_turn(&mut self, message: Message, attachments: Vec<ImageSource>) -> &mut Self {
        let has_payload = !attachments.is_empty() || message.has_attachments();
        if message.content.is_empty() && !has_payload {
            self.record_error(format!(
                "{:?} message at position {} has no content, images or tool calls",
                message.role,
                self.turns.len()
            ));
        }
        self.turns.push(Turn {
            message,
            attachments,
        });
        self
    }

    // Only the first error is kept; it surfaces from `build`.
    fn record_error(&mut self, reason: String) {
        if self.error.is_none() {
            self.error = Some(reason);
        }
    }
}

/// Builds [`EmbeddingsRequest`]s for a model and prompt.
///
/// # Example
/// ```rust
/// use ollama_chat::builder::EmbeddingsRequestBuilder;
///
/// let request = EmbeddingsRequestBuilder::new("nomic-embed-text", "What is the capital of France?")
///     .unwrap()
///     .with_keep_alive("10m")
///     .build()
///     .unwrap();
/// assert_eq!(request.keep_alive.as_deref(), Some("10m"));
/// ```
#[derive(Debug, Clone)]
pub struct EmbeddingsRequestBuilder {
    request: EmbeddingsRequest,
}

impl EmbeddingsRequestBuilder {
    /// Create a builder for embedding `prompt` with `model`.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Result<Self, ClientError> {
        let model = model.into();
        validate_model(&model)?;
        Ok(Self {
            request: EmbeddingsRequest {
                model,
                prompt: prompt.into(),
                ..Default::default()
            },
        })
    }

    /// Merge options into the pending set; later values win per key.
    pub fn with_options(&mut self, options: Options) -> &mut Self {
        self.request.options.merge(&options);
        self
    }

    /// How long the model stays loaded after the request, e.g. `"5m"`.
    pub fn with_keep_alive(&mut self, keep_alive: impl Into<String>) -> &mut Self {
        self.request.keep_alive = Some(keep_alive.into());
        self
    }

    /// Validate and produce the request.
    pub fn build(&self) -> Result<EmbeddingsRequest, ClientError> {
        validate_model(&self.request.model)?;
        self.request.options.validate()?;
        Ok(self.request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionValue, OptionsBuilder};
    use base64::prelude::*;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn builder() -> ChatRequestBuilder {
        ChatRequestBuilder::new("DummyModel").unwrap()
    }

    fn round_trip(request: &ChatRequest) -> ChatRequest {
        let json = serde_json::to_string(request).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn test_only_mandatory_fields() {
        let request = builder()
            .with_message(Role::User, "Some prompt")
            .build()
            .await
            .unwrap();
        assert_eq!(round_trip(&request), request);
    }

    #[tokio::test]
    async fn test_multiple_messages_keep_order() {
        let request = builder()
            .with_message(Role::System, "System prompt")
            .with_message(Role::User, "Some prompt")
            .with_message(Role::Assistant, "Some answer")
            .build()
            .await
            .unwrap();

        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(request.messages[1].content, "Some prompt");
        assert_eq!(round_trip(&request), request);
    }

    #[tokio::test]
    async fn test_message_with_image_file() {
        let bytes = b"\xff\xd8\xff\xe0 not really a jpeg";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();

        let request = builder()
            .with_message_images(
                Role::User,
                "What's in the picture?",
                vec![ImageSource::file(file.path())],
            )
            .build()
            .await
            .unwrap();

        let value = serde_json::to_value(&request).unwrap();
        let encoded = value["messages"][0]["images"][0].as_str().unwrap();
        assert!(!encoded.is_empty());

        let decoded = round_trip(&request);
        assert_eq!(decoded, request);
        assert_eq!(
            BASE64_STANDARD.decode(&decoded.messages[0].images[0]).unwrap(),
            bytes
        );
    }

    #[tokio::test]
    async fn test_remote_image_fetched_at_build() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/boat.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote jpeg".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/boat.jpg", server.uri());
        let mut chat = builder();
        chat.with_message_images(
            Role::User,
            "What's in the picture?",
            vec![ImageSource::url(&url).unwrap()],
        );
        let request = chat.build().await.unwrap();

        assert_eq!(request.messages[0].images.len(), 1);
        assert_eq!(
            BASE64_STANDARD.decode(&request.messages[0].images[0]).unwrap(),
            b"remote jpeg"
        );
        assert_eq!(round_trip(&request), request);
    }

    #[tokio::test]
    async fn test_unreadable_image_fails_build() {
        let err = builder()
            .with_message_images(
                Role::User,
                "What's in the picture?",
                vec![ImageSource::file("missing/dog-on-a-boat.jpg")],
            )
            .build()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::ImageResolution { ref reference, .. } if reference == "missing/dog-on-a-boat.jpg"
        ));
    }

    #[tokio::test]
    async fn test_with_options_preserves_numeric_kinds() {
        let mut options = OptionsBuilder::new();
        let mut chat = builder();
        chat.with_message(Role::User, "Some prompt")
            .with_options(options.set_mirostat(1).build())
            .with_options(options.set_temperature(1.0).build())
            .with_options(options.set_mirostat_eta(1.0).build())
            .with_options(options.set_mirostat_tau(1.0).build())
            .with_options(options.set_num_gpu(1).build())
            .with_options(options.set_seed(1).build())
            .with_options(options.set_top_k(1).build())
            .with_options(options.set_top_p(1.0).build())
            .with_options(options.set_min_p(1.0).build())
            .with_options(options.set_custom("cust_float", 1.0f32).unwrap().build())
            .with_options(options.set_custom("cust_int", 1).unwrap().build())
            .with_options(options.set_custom("cust_str", "custom").unwrap().build());
        let request = chat.build().await.unwrap();

        let decoded = round_trip(&request);
        assert_eq!(decoded, request);

        let get = |key: &str| decoded.options.get(key).cloned();
        assert_eq!(get("mirostat"), Some(OptionValue::Int(1)));
        assert_eq!(get("temperature"), Some(OptionValue::Float(1.0)));
        assert_eq!(get("mirostat_eta"), Some(OptionValue::Float(1.0)));
        assert_eq!(get("mirostat_tau"), Some(OptionValue::Float(1.0)));
        assert_eq!(get("num_gpu"), Some(OptionValue::Int(1)));
        assert_eq!(get("seed"), Some(OptionValue::Int(1)));
        assert_eq!(get("top_k"), Some(OptionValue::Int(1)));
        assert_eq!(get("top_p"), Some(OptionValue::Float(1.0)));
        assert_eq!(get("min_p"), Some(OptionValue::Float(1.0)));
        assert_eq!(get("cust_float"), Some(OptionValue::Float(1.0)));
        assert_eq!(get("cust_int"), Some(OptionValue::Int(1)));
        assert_eq!(get("cust_str"), Some(OptionValue::Str("custom".to_string())));
    }

    #[tokio::test]
    async fn test_non_finite_option_fails_build() {
        let mut chat = builder();
        chat.with_message(Role::User, "Some prompt")
            .with_options(OptionsBuilder::new().set_temperature(f64::NAN).build());

        let err = chat.build().await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(ref m) if m.contains("temperature")));

        chat.with_options(OptionsBuilder::new().set_temperature(0.7).build());
        let request = chat.build().await.unwrap();
        assert_eq!(round_trip(&request), request);
    }

    #[tokio::test]
    async fn test_with_template() {
        let request = builder()
            .with_template("System Template")
            .build()
            .await
            .unwrap();
        assert_eq!(request.template.as_deref(), Some("System Template"));
        assert_eq!(round_trip(&request), request);
    }

    #[tokio::test]
    async fn test_with_streaming() {
        let request = builder().with_streaming().build().await.unwrap();
        assert!(round_trip(&request).stream);
    }

    #[tokio::test]
    async fn test_with_keep_alive() {
        let request = builder().with_keep_alive("5m").build().await.unwrap();
        let decoded = round_trip(&request);
        assert_eq!(decoded.keep_alive.as_deref(), Some("5m"));
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn test_with_response_schema_for_type() {
        #[derive(JsonSchema)]
        #[allow(dead_code)]
        struct SimpleClass {
            parameter: String,
        }

        let request = builder()
            .with_response_schema_for::<SimpleClass>()
            .build()
            .await
            .unwrap();

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("format").is_some());
        assert_eq!(
            value["format"]["properties"]["parameter"]["type"],
            json!("string")
        );
        assert_eq!(round_trip(&request), request);
    }

    #[tokio::test]
    async fn test_with_explicit_schema_and_json_format() {
        let schema = json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        });
        let mut chat = builder();
        let request = chat.with_response_schema(schema.clone()).build().await.unwrap();
        assert_eq!(request.format, Some(schema));

        let request = chat.with_json_format().build().await.unwrap();
        assert_eq!(request.format, Some(json!("json")));
    }

    #[tokio::test]
    async fn test_snapshot_unaffected_by_reset() {
        let mut chat = builder();
        chat.with_message(Role::User, "one")
            .with_message(Role::User, "two")
            .with_keep_alive("1m");
        let snapshot = chat.build().await.unwrap();

        chat.reset();
        chat.with_message(Role::User, "three");
        let after = chat.build().await.unwrap();

        let contents: Vec<&str> = snapshot.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert_eq!(snapshot.keep_alive.as_deref(), Some("1m"));
        assert_eq!(after.messages.len(), 1);
        assert_eq!(after.keep_alive, None);
        assert_eq!(after.model, "DummyModel");
    }

    #[tokio::test]
    async fn test_reset_clears_options() {
        let mut chat = builder();
        chat.with_options(OptionsBuilder::new().set_seed(3).build());
        chat.reset();
        let request = chat.build().await.unwrap();
        assert!(request.options.is_empty());
    }

    #[test]
    fn test_empty_model_rejected() {
        assert!(matches!(
            ChatRequestBuilder::new(""),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            ChatRequestBuilder::new("   "),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_message_fails_build() {
        let mut chat = builder();
        chat.with_message(Role::User, "");
        assert!(matches!(
            chat.build().await,
            Err(ClientError::InvalidArgument(_))
        ));

        chat.reset();
        chat.with_tool_calls_message(
            Role::Assistant,
            "",
            vec![ToolCall::new("lookup", json!({ "q": "x" }))],
        );
        assert!(chat.build().await.is_ok());
    }

    #[tokio::test]
    async fn test_history_messages_carried_as_is() {
        let mut image_turn = Message::new(Role::User, "What's in the picture?");
        image_turn.images.push("aGVsbG8=".to_string());
        let history = vec![image_turn, Message::new(Role::Assistant, "A dog on a boat.")];

        let request = builder()
            .with_messages(history.clone())
            .with_message(Role::User, "What's the dog's breed?")
            .build()
            .await
            .unwrap();

        assert_eq!(request.messages.len(), 3);
        assert_eq!(&request.messages[..2], &history[..]);
    }

    #[tokio::test]
    async fn test_tools_serialized() {
        let request = builder()
            .with_message(Role::User, "Weather in Paris?")
            .with_tools(vec![Tool::function(
                "get_weather",
                "Current weather for a city",
                json!({ "type": "object", "properties": { "city": { "type": "string" } } }),
            )])
            .build()
            .await
            .unwrap();

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["tools"][0]["type"], json!("function"));
        assert_eq!(round_trip(&request), request);
    }

    #[test]
    fn test_embeddings_builder() {
        let mut embeddings =
            EmbeddingsRequestBuilder::new("DummyModel", "What is the capital of France?").unwrap();
        embeddings
            .with_options(OptionsBuilder::new().set_num_ctx(2048).build())
            .with_keep_alive("5m");
        let request = embeddings.build().unwrap();

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "DummyModel",
                "prompt": "What is the capital of France?",
                "options": { "num_ctx": 2048 },
                "keep_alive": "5m"
            })
        );

        assert!(matches!(
            EmbeddingsRequestBuilder::new(" ", "prompt"),
            Err(ClientError::InvalidArgument(_))
        ));

        embeddings.with_options(OptionsBuilder::new().set_top_p(f64::INFINITY).build());
        assert!(matches!(embeddings.build(), Err(ClientError::InvalidArgument(_))));
    }
}
