//! Adapters for external collaborators: image hosting, text generation and
//! the registration webhook. None of them retry.

use std::sync::Arc;

use agora_shared::constants::FALLBACK_ASSISTANT_REPLY;
use agora_shared::UserId;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{ExternalServiceUnavailable, UploadError};

/// Stores image bytes and returns their public URL.
pub trait BlobUploader: Send + Sync {
    fn upload(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<String, UploadError>>;
}

pub struct HttpBlobUploader {
    client: reqwest::Client,
    url: String,
    key: Option<String>,
}

impl HttpBlobUploader {
    pub fn new(url: impl Into<String>, key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            key,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Option<Self> {
        let url = config.upload_url.clone()?;
        Some(Self::new(url, config.upload_key.clone()))
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<String, UploadError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        if let Some(key) = &self.key {
            request = request.query(&[("key", key)]);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(UploadError::Status(resp.status().as_u16()));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        hosted_url(&body)
    }
}

impl BlobUploader for HttpBlobUploader {
    fn upload(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<String, UploadError>> {
        let size = bytes.len();
        async move {
            let result = self.send(bytes).await;
            match &result {
                Ok(url) => debug!(size, url = %url, "image uploaded"),
                Err(e) => warn!(size, error = %e, "image upload failed"),
            }
            result
        }
        .boxed()
    }
}

/// Image hosts answer `{"data": {"url": ...}}`.
fn hosted_url(body: &Value) -> Result<String, UploadError> {
    body.pointer("/data/url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| UploadError::InvalidResponse(format!("no data.url in {body}")))
}

/// Best-effort text completion.
pub trait TextGenerator: Send + Sync {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        system: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, ExternalServiceUnavailable>>;
}

const TEXT_SERVICE: &str = "text generation";

pub struct HttpTextGenerator {
    client: reqwest::Client,
    url: String,
    key: String,
}

impl HttpTextGenerator {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            key: key.into(),
        }
    }

    /// Needs both an endpoint and a key.
    pub fn from_config(config: &SyncConfig) -> Option<Self> {
        let url = config.text_api_url.clone()?;
        let key = config.text_api_key.clone()?;
        Some(Self::new(url, key))
    }

    async fn send(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, ExternalServiceUnavailable> {
        let unavailable = |reason: String| ExternalServiceUnavailable::new(TEXT_SERVICE, reason);

        let resp = self
            .client
            .post(&self.url)
            .query(&[("key", &self.key)])
            .json(&completion_request(prompt, system))
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(unavailable(format!("HTTP {}", resp.status())));
        }

        let body: Value = resp.json().await.map_err(|e| unavailable(e.to_string()))?;
        completion_text(&body).ok_or_else(|| unavailable("response carried no text".into()))
    }
}

impl TextGenerator for HttpTextGenerator {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        system: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, ExternalServiceUnavailable>> {
        self.send(prompt, system).boxed()
    }
}

fn completion_request(prompt: &str, system: Option<&str>) -> Value {
    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
    });
    if let Some(system) = system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

fn completion_text(body: &Value) -> Option<String> {
    let parts = body.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

/// Chat assistant. Always answers, falling back to a fixed reply.
#[derive(Clone, Default)]
pub struct Assistant {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl Assistant {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        let generator = HttpTextGenerator::from_config(config)
            .map(|g| Arc::new(g) as Arc<dyn TextGenerator>);
        Self::new(generator)
    }

    pub async fn reply(&self, prompt: &str, system: Option<&str>) -> String {
        let Some(generator) = &self.generator else {
            debug!("no text generator configured, using fallback reply");
            return FALLBACK_ASSISTANT_REPLY.to_string();
        };
        match generator.complete(prompt, system).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "assistant degraded to fallback reply");
                FALLBACK_ASSISTANT_REPLY.to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub kind: &'static str,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn registered(user_id: UserId) -> Self {
        Self {
            kind: "user.registered",
            user_id,
            timestamp: Utc::now(),
        }
    }
}

/// Fire-and-forget event forwarder.
#[derive(Clone)]
pub struct Webhook {
    client: reqwest::Client,
    url: Option<String>,
}

impl Webhook {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.webhook_url.clone())
    }

    /// Post `event` on a background task. Returns `None` when no URL is
    /// configured. Failures are only logged.
    pub fn notify(&self, event: WebhookEvent) -> Option<JoinHandle<()>> {
        let url = self.url.clone()?;
        let client = self.client.clone();
        Some(tokio::spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(kind = event.kind, user = %event.user_id, "webhook delivered");
                }
                Ok(resp) => {
                    warn!(kind = event.kind, status = %resp.status(), "webhook rejected");
                }
                Err(e) => warn!(kind = event.kind, error = %e, "webhook failed"),
            }
        }))
    }
}
