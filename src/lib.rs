//! # ollama-chat - Chat and generation client for Ollama-style model servers
//!
//! A small, pragmatic Rust library for building conversational requests,
//! encoding generation options and reassembling streamed replies.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Conversation builder that carries history, images and tool calls across turns
//! - Typed generation options that keep integers and floats distinct on the wire
//! - Streaming support via newline-delimited JSON
//! - Pluggable transport behind a trait seam
//!
//! ## Architecture
//!
//! - **`ChatRequestBuilder`**: accumulates messages and options, produces `ChatRequest` snapshots
//! - **`OptionsBuilder`**: typed setters plus validated custom keys, produces `Options`
//! - **`StreamAssembler`**: turns fragments into the final text, in order, exactly
//! - **`EmbeddingsRequestBuilder`**: validated `EmbeddingsRequest`s for `/api/embeddings`
//! - **`OllamaClient`**: sends requests through a `Transport` and returns `ChatResult` / `GenerateResult`
//!
//! ## Example
//! ```no_run
//! use ollama_chat::{ChatRequestBuilder, OllamaClient, OptionsBuilder, Role, TransportOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OllamaClient::new(TransportOptions::default())?;
//!
//!     let options = OptionsBuilder::new().set_temperature(0.2).build();
//!     let request = ChatRequestBuilder::new("llama3")?
//!         .with_message(Role::System, "Answer briefly.")
//!         .with_message(Role::User, "Why is the sky blue?")
//!         .with_options(options)
//!         .build()
//!         .await?;
//!
//!     let result = client
//!         .chat_streaming(request, |token| print!("{}", token))
//!         .await?;
//!     println!("\n{} messages in history", result.history().len());
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod client;
pub mod http;
pub mod image;
pub mod model;
pub mod ndjson;
pub mod options;
pub mod stream;

// Re-exports for convenience
pub use builder::{ChatRequestBuilder, EmbeddingsRequestBuilder};
pub use client::{ClientError, OllamaClient, Transport};
pub use http::HttpTransport;
pub use image::ImageSource;
pub use model::{
    ChatRequest, ChatResult, EmbeddingsRequest, Fragment, GenerateRequest, GenerateResult,
    Message, Role, Statistics, Tool, ToolCall,
};
pub use options::{OptionValue, Options, OptionsBuilder, TransportOptions};
pub use stream::{ProgressMode, StreamAssembler};
