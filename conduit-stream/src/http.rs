//! HTTP transport helpers

use bytes::Bytes;
use chrono::{DateTime, Utc};
use conduit_core::{AbortSignal, Error, Result};
use futures::{Stream, TryStreamExt};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Raw response body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// JSON-over-HTTP transport
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// POST a JSON body and parse the JSON response
    async fn post_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        abort: &AbortSignal,
    ) -> Result<Value>;

    /// POST a JSON body and return the response body as a byte stream
    async fn post_stream(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        abort: &AbortSignal,
    ) -> Result<ByteStream>;
}

/// [`HttpClient`] backed by reqwest
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
}

impl ApiClient {
    /// Create a client with a 300 second request timeout
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(network_error)?;

        Ok(Self { client })
    }

    /// Use a preconfigured reqwest client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        abort: &AbortSignal,
    ) -> Result<Response> {
        abort.check()?;
        let request = self.client.post(url).headers(headers).json(body).send();
        let response = race_abort(abort, request).await?.map_err(network_error)?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = race_abort(abort, response.text())
            .await?
            .unwrap_or_default();
        debug!(status = status.as_u16(), url, "API call failed");
        Err(api_error(status, text, retry_after))
    }
}

#[async_trait::async_trait]
impl HttpClient for ApiClient {
    async fn post_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        abort: &AbortSignal,
    ) -> Result<Value> {
        let response = self.send(url, headers, body, abort).await?;
        let text = race_abort(abort, response.text())
            .await?
            .map_err(network_error)?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post_stream(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        abort: &AbortSignal,
    ) -> Result<ByteStream> {
        let response = self.send(url, headers, body, abort).await?;
        Ok(Box::pin(response.bytes_stream().map_err(network_error)))
    }
}

async fn race_abort<F: Future>(abort: &AbortSignal, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(Error::Abort),
        output = future => Ok(output),
    }
}

/// Convert a reqwest failure into a transport error
pub fn network_error(error: reqwest::Error) -> Error {
    Error::network_with_source(error.to_string(), error)
}

/// Build a classified API error from a failed response
pub fn api_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> Error {
    let message = error_message(&body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());

    let mut error = Error::api(status.as_u16(), message);
    if !body.is_empty() {
        error = error.with_body(body);
    }
    if let Some(delay) = retry_after {
        error = error.with_retry_after(delay);
    }
    error
}

/// Pull a human-readable message out of common JSON error bodies
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("error"))?;
    message.as_str().map(str::to_string)
}

/// Parse a `Retry-After` header given in seconds or as an HTTP date
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delay = date.with_timezone(&Utc) - Utc::now();
    Some(delay.to_std().unwrap_or(Duration::ZERO))
}
