//! reqwest-backed transport

use super::{ByteStream, ChatTransport, SubmissionTransport, TransportError};
use crate::chat::{Conversation, CreateConversationResponse};
use crate::config::EngineConfig;
use crate::reconcile::{SubmissionReceipt, SubmissionRequest, SubmitTarget};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, Response};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

/// Talks to the study API over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let defaults = EngineConfig::default();
        Self::build(
            base_url.into(),
            defaults.request_timeout,
            defaults.connect_timeout,
        )
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, TransportError> {
        Self::build(
            config.api_url.clone(),
            config.request_timeout,
            config.connect_timeout,
        )
    }

    fn build(
        base_url: String,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a JSON body, turning non-success statuses into errors.
    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        idempotency_key: Option<&str>,
    ) -> Result<Response, TransportError> {
        let mut request = self.client.request(method, self.url(path)).json(body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await.map_err(|e| request_error(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(path, status = status.as_u16(), "Request rejected");
        Err(TransportError::from_status(
            status.as_u16(),
            &body,
            retry_after,
        ))
    }
}

fn request_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::timeout(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        TransportError::network(format!("Connection failed: {e}"))
    } else {
        TransportError::unknown(format!("Request failed: {e}"))
    }
}

fn body_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::timeout(format!("Timed out reading response: {e}"))
    } else {
        TransportError::network(format!("Failed to read response: {e}"))
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<Conversation, TransportError> {
        let body = json!({ "title": title.unwrap_or("New Chat") });
        let response = self
            .send_json(Method::POST, "/chat/conversations", &body, None)
            .await?;
        let text = response.text().await.map_err(|e| body_error(&e))?;
        let parsed: CreateConversationResponse = serde_json::from_str(&text).map_err(|e| {
            TransportError::decode(format!("Unexpected conversation response: {e} - body: {text}"))
        })?;
        Ok(parsed.into())
    }

    async fn open_message_stream(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<ByteStream, TransportError> {
        let path = format!("/chat/conversations/{conversation_id}/messages");
        let response = self
            .send_json(Method::POST, &path, &json!({ "content": content }), None)
            .await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(|e| body_error(&e)))
            .boxed())
    }
}

#[async_trait]
impl SubmissionTransport for HttpTransport {
    async fn submit(
        &self,
        target: &SubmitTarget,
        request: &SubmissionRequest,
    ) -> Result<SubmissionReceipt, TransportError> {
        let response = self
            .send_json(
                target.method().clone(),
                target.path(),
                request,
                Some(request.attempt_id.as_str()),
            )
            .await?;
        let text = response.text().await.map_err(|e| body_error(&e))?;
        if text.trim().is_empty() {
            return Ok(SubmissionReceipt::default());
        }
        // the server accepted the attempt; an odd body only loses its score
        Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(path = target.path(), error = %e, "Unreadable submission receipt");
            SubmissionReceipt::default()
        }))
    }
}
