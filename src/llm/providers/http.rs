//! HTTP plumbing shared by the adapters.
//!
//! Status codes and transport failures are classified here, once, into the
//! gateway error taxonomy. The line splitter is what SSE and NDJSON decoding
//! build on.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{GatewayError, TransientKind};
use crate::llm::traits::{HealthStatus, ProviderType};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the reqwest client adapters share for one provider
pub fn build_client() -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| GatewayError::configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Translate a transport-level failure
pub fn classify_send_error(provider: ProviderType, error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::provider_transient(provider, TransientKind::Timeout, error.to_string())
    } else if error.is_connect() || error.is_request() || error.is_body() {
        GatewayError::provider_transient(provider, TransientKind::Network, error.to_string())
    } else if error.is_decode() {
        GatewayError::provider_fatal(provider, format!("Malformed response body: {}", error))
    } else {
        GatewayError::provider_fatal(provider, error.to_string())
    }
}

/// Translate a non-success HTTP status
pub fn classify_status(
    provider: ProviderType,
    status: u16,
    retry_after_ms: Option<u64>,
    body: &str,
) -> GatewayError {
    let message = format!("HTTP {}: {}", status, truncate(body, 500));
    match status {
        408 => GatewayError::provider_transient(provider, TransientKind::Timeout, message),
        429 => GatewayError::provider_transient(
            provider,
            TransientKind::RateLimited { retry_after_ms },
            message,
        ),
        500..=599 => {
            GatewayError::provider_transient(provider, TransientKind::Unavailable { status }, message)
        }
        _ => GatewayError::provider_fatal(provider, message),
    }
}

/// `Retry-After` in milliseconds, when given as delta-seconds
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(|secs| (secs * 1000.0) as u64)
}

/// Send a request and fail on non-success statuses
pub async fn send(
    provider: ProviderType,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, GatewayError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_send_error(provider, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after_ms(response.headers());
    let body = response.text().await.unwrap_or_default();
    let error = classify_status(provider, status.as_u16(), retry_after, &body);
    tracing::warn!(%provider, status = status.as_u16(), code = error.code(), "Provider returned an error status");
    Err(error)
}

/// Read the whole body and decode it as JSON
pub async fn read_json<T: DeserializeOwned>(
    provider: ProviderType,
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let text = response
        .text()
        .await
        .map_err(|e| classify_send_error(provider, e))?;
    tracing::trace!(%provider, body = %text, "Provider response body");
    parse_json(provider, &text)
}

pub fn parse_json<T: DeserializeOwned>(provider: ProviderType, text: &str) -> Result<T, GatewayError> {
    serde_json::from_str(text).map_err(|e| {
        GatewayError::provider_fatal(provider, format!("Failed to parse JSON response: {}", e))
    })
}

/// Probe a GET endpoint and report latency
pub async fn probe(provider: ProviderType, request: reqwest::RequestBuilder) -> HealthStatus {
    let start = Instant::now();
    let result = request.timeout(HEALTH_CHECK_TIMEOUT).send().await;
    let latency = start.elapsed().as_millis() as u64;

    match result {
        Ok(response) if response.status().is_success() => HealthStatus {
            healthy: true,
            provider,
            latency_ms: Some(latency),
            error: None,
        },
        Ok(response) => HealthStatus {
            healthy: false,
            provider,
            latency_ms: Some(latency),
            error: Some(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )),
        },
        Err(e) => HealthStatus {
            healthy: false,
            provider,
            latency_ms: None,
            error: Some(format!("Connection failed: {}", e)),
        },
    }
}

/// Longest line accepted from a provider before the response is abandoned
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into complete lines
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network reads decode correctly. A partial line longer than the limit marks
/// the buffer as overflowing.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
        }
    }

    /// Append bytes and drain every complete, non-blank line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whether the pending partial line exceeds the limit
    pub fn is_overflowing(&self) -> bool {
        self.buffer.len() > self.max_line
    }

    /// Trailing data without a final newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

/// Body of `response` as a stream of lines
pub fn lines(
    provider: ProviderType,
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, GatewayError>> + Send {
    split_lines(provider, response.bytes_stream(), LineBuffer::new())
}

fn split_lines<S, B>(
    provider: ProviderType,
    bytes: S,
    mut buffer: LineBuffer,
) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in buffer.push(chunk.as_ref()) {
                        yield Ok(line);
                    }
                    if buffer.is_overflowing() {
                        tracing::error!(%provider, max_line = buffer.max_line, "Response line exceeds limit");
                        yield Err(GatewayError::provider_fatal(
                            provider,
                            format!("response line longer than {} bytes", buffer.max_line),
                        ));
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(%provider, error = %e, "Response stream failed");
                    yield Err(classify_send_error(provider, e));
                    return;
                }
            }
        }
        if let Some(line) = buffer.finish() {
            yield Ok(line);
        }
    }
}

/// Copy vendor passthrough fields into a request body
///
/// Keys the adapter already set, and the `reserved` keys, are never
/// overwritten; they are dropped with a warning.
pub fn merge_extra(
    body: &mut Value,
    extra: &HashMap<String, Value>,
    reserved: &[&str],
) {
    let object = match body.as_object_mut() {
        Some(object) => object,
        None => return,
    };
    for (key, value) in extra {
        if reserved.contains(&key.as_str()) || object.contains_key(key) {
            tracing::warn!(key = %key, "Ignoring extra parameter that overrides a request field");
            continue;
        }
        object.insert(key.clone(), value.clone());
    }
}

/// Payload of an SSE `data:` line
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}
