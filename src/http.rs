//! HTTP transport for the model service.
//!
//! This module provides reqwest client construction and the default
//! [`Transport`] implementation used by [`OllamaClient`](crate::client::OllamaClient).

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::client::{ClientError, Transport};
use crate::ndjson::NdjsonResponseExt;
use crate::options::TransportOptions;

/// Build a configured HTTP client from transport options.
///
/// This applies common configuration like timeouts and proxies.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&transport_options)?;
/// ```
pub fn build_http_client(transport_options: &TransportOptions) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Config(format!("invalid proxy '{}': {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if specified in transport options.
///
/// # Example
/// ```ignore
/// let mut req = client.post(url);
/// req = add_extra_headers(req, &transport_options.extra_headers);
/// ```
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// [`Transport`] over HTTP using reqwest.
///
/// Performs no retries. Non-success statuses become [`ClientError::ProviderError`];
/// connection and timeout failures are returned as [`ClientError::Http`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    options: TransportOptions,
}

impl HttpTransport {
    pub fn new(options: TransportOptions) -> Result<Self, ClientError> {
        reqwest::Url::parse(&options.base_url).map_err(|e| {
            ClientError::Config(format!("invalid base URL '{}': {}", options.base_url, e))
        })?;
        let client = build_http_client(&options)?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// The underlying reqwest client, shared for image downloads.
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.options.base_url.trim_end_matches('/'), endpoint)
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<reqwest::Response, ClientError> {
        let url = self.url(endpoint);
        debug!(%url, "POST");

        let req = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json");
        let req = add_extra_headers(req, &self.options.extra_headers);

        let response = req.json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await;
            return Err(handle_error_response(status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, body: Value) -> Result<Value, ClientError> {
        let response = self.post(endpoint, &body).await?;
        Ok(response.json().await?)
    }

    async fn send_streaming(
        &self,
        endpoint: &str,
        body: Value,
    ) -> Result<BoxStream<'static, Result<Value, ClientError>>, ClientError> {
        let response = self.post(endpoint, &body).await?;
        Ok(response.ndjson().boxed())
    }
}

/// Handle service error responses.
///
/// A body that could not be read is reported alongside the status.
fn handle_error_response(
    status: reqwest::StatusCode,
    body: Result<String, reqwest::Error>,
) -> ClientError {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            return ClientError::ProviderError(format!(
                "HTTP {} (error body unreadable: {})",
                status, e
            ))
        }
    };

    if let Ok(error_resp) = serde_json::from_str::<OllamaErrorResponse>(&body) {
        ClientError::ProviderError(format!("Ollama error ({}): {}", status, error_resp.error))
    } else {
        ClientError::ProviderError(format!("HTTP {}: {}", status, body))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_http_client() {
        let transport_options = TransportOptions::default().with_timeout(Duration::from_secs(30));

        let client = build_http_client(&transport_options);
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_http_client_with_proxy() {
        let transport_options =
            TransportOptions::default().with_proxy("http://proxy.example.com:8080".to_string());

        let client = build_http_client(&transport_options);
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let err = HttpTransport::new(TransportOptions::new("not a url")).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_url_joins_endpoint() {
        let transport = HttpTransport::new(TransportOptions::new("http://host:11434/")).unwrap();
        assert_eq!(transport.url("/api/chat"), "http://host:11434/api/chat");
    }

    #[test]
    fn test_handle_error_response() {
        let err = handle_error_response(
            reqwest::StatusCode::NOT_FOUND,
            Ok(r#"{"error":"model 'llama9' not found"}"#.to_string()),
        );
        assert!(matches!(err, ClientError::ProviderError(ref m) if m.contains("llama9")));

        let err = handle_error_response(
            reqwest::StatusCode::BAD_GATEWAY,
            Ok("upstream down".to_string()),
        );
        assert!(matches!(err, ClientError::ProviderError(ref m) if m == "HTTP 502 Bad Gateway: upstream down"));
    }

    #[test]
    fn test_unreadable_error_body_is_reported() {
        let read_error = Client::new().get("not a url").build().unwrap_err();
        let reason = read_error.to_string();

        let err = handle_error_response(reqwest::StatusCode::INTERNAL_SERVER_ERROR, Err(read_error));
        match err {
            ClientError::ProviderError(message) => {
                assert!(message.starts_with("HTTP 500 Internal Server Error"));
                assert!(message.contains(&reason));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
