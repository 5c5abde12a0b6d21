//! Streaming HTTP provider.
//!
//! Each chunk is POSTed as `application/octet-stream` to the configured
//! endpoint. The response body is read incrementally as newline-delimited JSON,
//! one [`ProviderEvent`] per line:
//!
//! ```text
//! {"type":"partial","text":"Hello"}
//! {"type":"final","text":"Hello world"}
//! {"type":"error","message":"timeout"}
//! ```
//!
//! Transport failures, non-2xx statuses and malformed lines all end the call
//! with a single `Error` event.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroizing;

use super::{ProviderError, ProviderEvent, ProviderSettings, ProviderStream, TranscriptionProvider};

/// Maximum number of body bytes echoed back in a status error
const MAX_ERROR_BODY_LEN: usize = 512;

/// Maximum length of one NDJSON line, newline excluded
const MAX_LINE_LEN: usize = 64 * 1024;

pub struct HttpStreamingProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<Zeroizing<String>>,
    timeout: Option<Duration>,
}

impl HttpStreamingProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let endpoint = settings.endpoint.as_deref().ok_or_else(|| {
            ProviderError::InvalidConfiguration(
                "http provider requires an endpoint (PROVIDER_ENDPOINT)".to_string(),
            )
        })?;
        let endpoint = Url::parse(endpoint).map_err(|e| {
            ProviderError::InvalidConfiguration(format!("Invalid endpoint '{endpoint}': {e}"))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ProviderError::InvalidConfiguration(format!(
                "Endpoint must use http or https, got '{}'",
                endpoint.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key.clone(),
            timeout: settings.timeout_ms.map(Duration::from_millis),
        })
    }

    fn build_request(&self, chunk: Bytes) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.as_str());
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        request
    }
}

impl TranscriptionProvider for HttpStreamingProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    fn stream_chunk(&self, chunk: Bytes) -> ProviderStream {
        let chunk_len = chunk.len();
        let request = self.build_request(chunk);
        let timeout_ms = self.timeout.map(|t| t.as_millis() as u64);

        Box::pin(async_stream::stream! {
            debug!(bytes = chunk_len, "Sending chunk to streaming endpoint");

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    yield ProviderEvent::from(map_request_error(e, timeout_ms));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let mut body = response.text().await.unwrap_or_default();
                body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY_LEN));
                warn!(status = status.as_u16(), "Streaming endpoint rejected chunk");
                yield ProviderEvent::from(ProviderError::Status {
                    status: status.as_u16(),
                    body,
                });
                return;
            }

            let mut body = response.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();
            // Bytes of `pending` already known to contain no newline
            let mut scanned = 0;

            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield ProviderEvent::from(map_request_error(e, timeout_ms));
                        return;
                    }
                };
                pending.extend_from_slice(&bytes);

                while let Some(offset) = pending[scanned..].iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=scanned + offset).collect();
                    scanned = 0;
                    match parse_line(&line) {
                        Ok(Some(event)) => {
                            let terminal = matches!(event, ProviderEvent::Error { .. });
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield ProviderEvent::from(e);
                            return;
                        }
                    }
                }

                scanned = pending.len();
                if pending.len() > MAX_LINE_LEN {
                    yield ProviderEvent::from(line_too_long());
                    return;
                }
            }

            // Final line may lack a trailing newline
            match parse_line(&pending) {
                Ok(Some(event)) => {
                    yield event;
                }
                Ok(None) => {}
                Err(e) => {
                    yield ProviderEvent::from(e);
                }
            }
        })
    }
}

/// Parse one NDJSON line. Blank lines are skipped.
fn parse_line(line: &[u8]) -> Result<Option<ProviderEvent>, ProviderError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }
    if line.len() > MAX_LINE_LEN {
        return Err(line_too_long());
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn line_too_long() -> ProviderError {
    ProviderError::InvalidResponse(format!("response line exceeds {MAX_LINE_LEN} bytes"))
}

fn map_request_error(error: reqwest::Error, timeout_ms: Option<u64>) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout_ms.unwrap_or_default())
    } else {
        ProviderError::ConnectionFailed(error.to_string())
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0)
}
