//! HTTP client for the generator service.
//!
//! Four endpoints are consumed: the skeleton provider, single-item generation,
//! the streaming bulk generator and the batched bulk generator. The
//! [`Generator`] trait is the seam the session drives, so runs can be
//! exercised without a server.

use crate::models::{Item, SetVariant, Skeleton, SkeletonError};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("setforge/", env!("CARGO_PKG_VERSION"));

/// Connect timeout; the whole-request timeout comes from configuration
/// because a batched run can take minutes.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("generator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Payload(String),

    #[error("generator rejected the request: {0}")]
    Rejected(String),

    #[error("slot {0} is not in the loaded skeleton")]
    UnknownSlot(String),

    #[error(transparent)]
    Skeleton(#[from] SkeletonError),
}

impl GeneratorError {
    /// Transport problems and server-side failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            GeneratorError::Network(_) => true,
            GeneratorError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GeneratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GeneratorError::Payload(e.to_string())
        } else {
            GeneratorError::Network(e.to_string())
        }
    }
}

/// Body of a single-item request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRequest {
    pub theme: String,
    #[serde(rename = "color")]
    pub category: String,
    #[serde(rename = "rarity")]
    pub sub_category: String,
    pub slot_id: String,
    /// The slot descriptor in the provider's shape.
    pub slot_data: Value,
}

/// Body of a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetRequest {
    pub theme: String,
    #[serde(serialize_with = "variant_wire_name")]
    pub set_type: SetVariant,
}

fn variant_wire_name<S: serde::Serializer>(variant: &SetVariant, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(variant.wire_name())
}

impl SetRequest {
    pub fn new(theme: impl Into<String>, variant: SetVariant) -> Self {
        Self {
            theme: theme.into(),
            set_type: variant,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    #[serde(default)]
    card: Option<Item>,
    #[serde(default)]
    error: Option<String>,
}

/// Raw chunks of a streaming response.
pub type ByteStream = BoxStream<'static, Result<Bytes, GeneratorError>>;

/// The generator service as seen by a [`Session`](super::session::Session).
#[cfg_attr(test, mockall::automock)]
pub trait Generator {
    fn fetch_skeleton(&self, variant: SetVariant) -> BoxFuture<'static, Result<Skeleton, GeneratorError>>;

    fn generate_item(&self, request: ItemRequest) -> BoxFuture<'static, Result<Item, GeneratorError>>;

    fn stream_set(&self, request: SetRequest) -> BoxFuture<'static, Result<ByteStream, GeneratorError>>;

    /// Terminal bulk response `{success, set, theme}`.
    fn generate_batched(&self, request: SetRequest) -> BoxFuture<'static, Result<Value, GeneratorError>>;
}

/// Batched bulk endpoint for a variant.
pub fn batched_path(variant: SetVariant) -> &'static str {
    match variant {
        SetVariant::Full => "/api/generate-full-set-batched-50",
        SetVariant::Commons => "/api/generate-commons-only-batched-50",
    }
}

pub const STREAM_PATH: &str = "/api/generate-set-stream";
pub const ITEM_PATH: &str = "/api/generate-card";

/// reqwest implementation of [`Generator`].
#[derive(Debug, Clone)]
pub struct GeneratorClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GeneratorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeneratorError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GeneratorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        // The service reports failures as {"error": "..."}
        let body = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(GeneratorError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl Generator for GeneratorClient {
    fn fetch_skeleton(&self, variant: SetVariant) -> BoxFuture<'static, Result<Skeleton, GeneratorError>> {
        let request = self.http_client.get(self.url(variant.skeleton_path()));
        Box::pin(async move {
            tracing::debug!(%variant, "Fetching skeleton");
            let response = Self::check(request.send().await?).await?;
            let value: Value = response.json().await?;
            let skeleton = Skeleton::from_json(&value)?;
            tracing::info!(%variant, slots = skeleton.total_slots(), "Skeleton loaded");
            Ok(skeleton)
        })
    }

    fn generate_item(&self, request: ItemRequest) -> BoxFuture<'static, Result<Item, GeneratorError>> {
        let builder = self.http_client.post(self.url(ITEM_PATH)).json(&request);
        Box::pin(async move {
            tracing::debug!(slot_id = %request.slot_id, "Requesting single item");
            let response = Self::check(builder.send().await?).await?;
            let body: ItemResponse = response.json().await?;
            match (body.card, body.error) {
                (Some(item), _) => Ok(item),
                (None, Some(error)) => Err(GeneratorError::Rejected(error)),
                (None, None) => Err(GeneratorError::Payload(
                    "response carries neither card nor error".to_string(),
                )),
            }
        })
    }

    fn stream_set(&self, request: SetRequest) -> BoxFuture<'static, Result<ByteStream, GeneratorError>> {
        let builder = self
            .http_client
            .post(self.url(STREAM_PATH))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request);
        Box::pin(async move {
            tracing::debug!(theme = %request.theme, variant = %request.set_type, "Opening generation stream");
            let response = Self::check(builder.send().await?).await?;
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(GeneratorError::from));
            Ok(stream.boxed())
        })
    }

    fn generate_batched(&self, request: SetRequest) -> BoxFuture<'static, Result<Value, GeneratorError>> {
        let builder = self
            .http_client
            .post(self.url(batched_path(request.set_type)))
            .json(&request);
        Box::pin(async move {
            tracing::debug!(theme = %request.theme, variant = %request.set_type, "Requesting batched set");
            let response = Self::check(builder.send().await?).await?;
            Ok(response.json().await?)
        })
    }
}
