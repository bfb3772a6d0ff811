//! Core client, transport trait and error types.

use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::http::HttpTransport;
use crate::image::{encode_all, ImageSource};
use crate::model::{
    ChatRequest, ChatResponse, ChatResult, EmbeddingsRequest, EmbeddingsResponse, Fragment,
    GenerateRequest, GenerateResponse, GenerateResult, Message, Role,
};
use crate::options::{Options, TransportOptions};
use crate::stream::{ProgressMode, StreamAssembler};

/// Endpoint for multi-turn chat requests.
pub const CHAT_ENDPOINT: &str = "/api/chat";

/// Endpoint for one-shot generation requests.
pub const GENERATE_ENDPOINT: &str = "/api/generate";

/// Endpoint for prompt embeddings.
pub const EMBEDDINGS_ENDPOINT: &str = "/api/embeddings";

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid type for option '{name}': expected integer, float, string or boolean, found {found}")]
    InvalidOptionType { name: String, found: &'static str },

    #[error("Failed to resolve image '{reference}': {reason}")]
    ImageResolution { reference: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Streaming failure: {0}")]
    StreamingFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Byte-level transport to the model service.
///
/// Implementations own connection handling, timeouts and any retry policy.
/// Errors must be returned as produced; callers surface them unmodified.
///
/// # Required Methods
/// - `send`: POST a JSON body and return the single parsed JSON response
/// - `send_streaming`: POST a JSON body and return the response as a stream
///   of parsed JSON objects, one per newline-delimited record
///
/// # Example
/// ```rust,ignore
/// struct Canned(Value);
///
/// #[async_trait]
/// impl Transport for Canned {
///     async fn send(&self, _endpoint: &str, _body: Value) -> Result<Value, ClientError> {
///         Ok(self.0.clone())
///     }
///
///     async fn send_streaming(
///         &self,
///         _endpoint: &str,
///         _body: Value,
///     ) -> Result<BoxStream<'static, Result<Value, ClientError>>, ClientError> {
///         Ok(futures::stream::iter(vec![Ok(self.0.clone())]).boxed())
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the complete response.
    async fn send(&self, endpoint: &str, body: Value) -> Result<Value, ClientError>;

    /// Send a request and return its newline-delimited JSON records in arrival order.
    async fn send_streaming(
        &self,
        endpoint: &str,
        body: Value,
    ) -> Result<BoxStream<'static, Result<Value, ClientError>>, ClientError>;
}

/// Client for the chat and generate endpoints.
///
/// Requests are built with [`ChatRequestBuilder`](crate::builder::ChatRequestBuilder)
/// or [`GenerateRequest`] and sent through a [`Transport`]. Streaming variants feed
/// every fragment through a [`StreamAssembler`] before a result is produced.
#[derive(Debug, Clone)]
pub struct OllamaClient<T = HttpTransport> {
    transport: T,
    http: reqwest::Client,
}

impl OllamaClient<HttpTransport> {
    /// Create a client talking HTTP to the configured base URL.
    pub fn new(options: TransportOptions) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(options)?;
        let http = transport.http_client().clone();
        Ok(Self { transport, http })
    }

    /// Create a client configured from `OLLAMA_HOST` and `OLLAMA_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(TransportOptions::from_env()?)
    }
}

impl<T: Transport> OllamaClient<T> {
    /// Wrap an arbitrary transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            http: reqwest::Client::new(),
        }
    }

    /// Replace the HTTP client used to fetch remote images.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a chat request and wait for the complete reply.
    ///
    /// The returned history is the request's messages followed by the assistant reply.
    pub async fn chat(&self, mut request: ChatRequest) -> Result<ChatResult, ClientError> {
        validate_request(&request.model, &request.options)?;
        request.stream = false;

        let started = Instant::now();
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat request"
        );

        let body = serde_json::to_value(&request)?;
        let value = self.transport.send(CHAT_ENDPOINT, body).await?;
        let response: ChatResponse = serde_json::from_value(value)?;
        if let Some(error) = response.error {
            return Err(ClientError::ProviderError(error));
        }

        let stats = response.stats.into_option();
        let reply = response
            .message
            .map(|message| message.into_message())
            .unwrap_or_else(|| Message::new(Role::Assistant, ""));

        Ok(ChatResult::new(
            request.messages,
            reply,
            stats,
            started.elapsed(),
        ))
    }

    /// Send a chat request with streaming enabled, handing each fragment's text to
    /// `on_token` as it arrives.
    ///
    /// The callback receives incremental pieces; their concatenation equals the
    /// final response text.
    pub async fn chat_streaming<F>(
        &self,
        mut request: ChatRequest,
        on_token: F,
    ) -> Result<ChatResult, ClientError>
    where
        F: FnMut(&str) + Send,
    {
        validate_request(&request.model, &request.options)?;
        request.stream = true;

        let started = Instant::now();
        let fragments = self.open_chat_stream(&request).await?;
        let assembled = StreamAssembler::new(ProgressMode::Incremental)
            .assemble(fragments, on_token)
            .await?;

        debug!(
            model = %request.model,
            fragments = assembled.fragments,
            "Chat stream complete"
        );

        let reply = Message {
            role: Role::Assistant,
            content: assembled.text,
            images: Vec::new(),
            tool_calls: assembled.tool_calls,
        };

        Ok(ChatResult::new(
            request.messages,
            reply,
            assembled.stats,
            started.elapsed(),
        ))
    }

    /// Send a chat request with streaming enabled and return the raw fragment stream.
    ///
    /// The caller takes over consumption; no history is assembled.
    pub async fn chat_stream(
        &self,
        mut request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<Fragment, ClientError>>, ClientError> {
        validate_request(&request.model, &request.options)?;
        request.stream = true;
        self.open_chat_stream(&request).await
    }

    /// Send a one-shot generation request and wait for the complete response.
    pub async fn generate(
        &self,
        mut request: GenerateRequest,
    ) -> Result<GenerateResult, ClientError> {
        validate_request(&request.model, &request.options)?;
        request.stream = false;

        let started = Instant::now();
        debug!(
            model = %request.model,
            images = request.images.len(),
            "Sending generate request"
        );

        let body = serde_json::to_value(&request)?;
        let value = self.transport.send(GENERATE_ENDPOINT, body).await?;
        let response: GenerateResponse = serde_json::from_value(value)?;
        if let Some(error) = response.error {
            return Err(ClientError::ProviderError(error));
        }

        Ok(GenerateResult::new(
            response.response,
            response.stats.into_option(),
            response.context,
            started.elapsed(),
        ))
    }

    /// Send a generation request with streaming enabled.
    ///
    /// `on_progress` receives the cumulative text generated so far after every
    /// fragment, so its final observation equals the response text.
    pub async fn generate_streaming<F>(
        &self,
        mut request: GenerateRequest,
        on_progress: F,
    ) -> Result<GenerateResult, ClientError>
    where
        F: FnMut(&str) + Send,
    {
        validate_request(&request.model, &request.options)?;
        request.stream = true;

        let started = Instant::now();
        let body = serde_json::to_value(&request)?;
        let records = self
            .transport
            .send_streaming(GENERATE_ENDPOINT, body)
            .await?;

        let fragments = records.map(|record| {
            let response: GenerateResponse = serde_json::from_value(record?)?;
            response.into_fragment()
        });

        let assembled = StreamAssembler::new(ProgressMode::Cumulative)
            .assemble(fragments, on_progress)
            .await?;

        debug!(
            model = %request.model,
            fragments = assembled.fragments,
            "Generate stream complete"
        );

        Ok(GenerateResult::new(
            assembled.text,
            assembled.stats,
            assembled.context,
            started.elapsed(),
        ))
    }

    /// Resolve `images` to base64 and run a non-streaming generation with them.
    pub async fn generate_with_images(
        &self,
        model: impl Into<String>,
        prompt: impl Into<String>,
        images: &[ImageSource],
        options: Options,
    ) -> Result<GenerateResult, ClientError> {
        let model = model.into();
        validate_request(&model, &options)?;

        let encoded = encode_all(&self.http, images).await?;
        let request = GenerateRequest::new(model, prompt)
            .with_images(encoded)
            .with_options(options);
        self.generate(request).await
    }

    /// Embed a prompt, returning the embedding vector.
    pub async fn embeddings(&self, request: EmbeddingsRequest) -> Result<Vec<f64>, ClientError> {
        validate_request(&request.model, &request.options)?;

        debug!(model = %request.model, "Sending embeddings request");
        let body = serde_json::to_value(&request)?;
        let value = self.transport.send(EMBEDDINGS_ENDPOINT, body).await?;
        let response: EmbeddingsResponse = serde_json::from_value(value)?;
        if let Some(error) = response.error {
            return Err(ClientError::ProviderError(error));
        }

        debug!(dimensions = response.embedding.len(), "Embeddings received");
        Ok(response.embedding)
    }

    async fn open_chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<Fragment, ClientError>>, ClientError> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Opening chat stream"
        );

        let body = serde_json::to_value(request)?;
        let records = self.transport.send_streaming(CHAT_ENDPOINT, body).await?;
        Ok(records
            .map(|record| {
                let response: ChatResponse = serde_json::from_value(record?)?;
                response.into_fragment()
            })
            .boxed())
    }
}

/// Reject blank model names before anything reaches the transport.
pub(crate) fn validate_model(model: &str) -> Result<(), ClientError> {
    if model.trim().is_empty() {
        return Err(ClientError::InvalidArgument(
            "model name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_request(model: &str, options: &Options) -> Result<(), ClientError> {
    validate_model(model)?;
    options.validate()
}
