//! HTTP client for sink delivery with bounded timeouts.
//!
//! Posts envelope wire bodies to the configured sink URL and categorizes
//! transport failures for the retry engine. Connection pooling is handled
//! by the underlying `reqwest` client.

use std::time::Duration;

use ponte_core::Envelope;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Configuration for the sink client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Destination URL for envelope POSTs.
    pub url: String,
    /// Timeout applied to every request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/ingest".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: "Ponte-Bridge/0.1".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Response from one delivery attempt.
#[derive(Debug, Clone)]
pub struct SinkResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated for records.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the status was 2xx.
    pub is_success: bool,
    /// Retry-After guidance in seconds, when present.
    pub retry_after_seconds: Option<u64>,
}

/// HTTP client posting envelopes to the sink.
#[derive(Debug, Clone)]
pub struct SinkClient {
    client: reqwest::Client,
    config: SinkConfig,
}

impl SinkClient {
    /// Creates a sink client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] if the URL does not parse
    /// or the HTTP client cannot be built.
    pub fn new(config: SinkConfig) -> Result<Self> {
        reqwest::Url::parse(&config.url)
            .map_err(|e| DeliveryError::configuration(format!("invalid sink URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Posts an envelope's wire body to the sink.
    ///
    /// A response is returned for every status code; the worker classifies
    /// non-2xx statuses into retryable or terminal errors.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Timeout`] when the request exceeds the timeout
    /// - [`DeliveryError::Network`] for connection-level failures
    pub async fn deliver(&self, envelope: &Envelope) -> Result<SinkResponse> {
        let span = info_span!(
            "sink_delivery",
            envelope_id = %envelope.id,
            topic = %envelope.topic,
            attempt = envelope.attempt
        );

        async move {
            let start = std::time::Instant::now();

            let request = self
                .client
                .post(&self.config.url)
                .header("content-type", "application/json")
                .header("x-ponte-envelope-id", envelope.id.to_string())
                .header("x-ponte-attempt", envelope.attempt.to_string())
                .body(envelope.body.clone());

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {e}");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start.elapsed();
            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();
            let retry_after_seconds = extract_retry_after_seconds(response.headers());

            let body = read_truncated_body(response).await;

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "received sink response"
            );

            Ok(SinkResponse { status_code, body, duration, is_success, retry_after_seconds })
        }
        .instrument(span)
        .await
    }
}

/// Maximum response body retained for dead-letter records.
const MAX_BODY_CAPTURE: usize = 1024;

async fn read_truncated_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            if bytes.len() > MAX_BODY_CAPTURE {
                let truncated = String::from_utf8_lossy(&bytes[..MAX_BODY_CAPTURE]);
                format!("{truncated}... (truncated)")
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        },
        Err(e) => {
            tracing::warn!("failed to read response body: {e}");
            format!("[failed to read response body: {e}]")
        },
    }
}

/// Extracts Retry-After guidance from response headers.
///
/// Supports both the seconds format and the HTTP-date format. Unparseable
/// values fall back to 60 seconds rather than being ignored.
fn extract_retry_after_seconds(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    const DEFAULT_RETRY_AFTER: u64 = 60;

    let value = headers.get("retry-after")?.to_str().ok()?;

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(value) {
        let retry_time = date_time.with_timezone(&chrono::Utc);
        let now = chrono::Utc::now();
        if retry_time > now {
            if let Ok(wait) = retry_time.signed_duration_since(now).to_std() {
                return Some(wait.as_secs());
            }
        }
    }

    Some(DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Utc;
    use ponte_core::Qos;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_envelope() -> Envelope {
        Envelope::new(
            "data/sensor",
            Bytes::from_static(br#"{"t":25.4}"#),
            Qos::AtLeastOnce,
            Utc::now(),
        )
    }

    fn client_for(server: &MockServer) -> SinkClient {
        SinkClient::new(SinkConfig {
            url: format!("{}/ingest", server.uri()),
            ..SinkConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_delivery_posts_wire_body() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/ingest"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_partial_json(serde_json::json!({
                "t": 25.4,
                "topic": "data/sensor"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server).deliver(&test_envelope()).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert!(response.is_success);
        assert_eq!(response.body, "OK");
    }

    #[tokio::test]
    async fn attempt_metadata_headers_are_sent() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::header_exists("x-ponte-envelope-id"))
            .and(matchers::header("x-ponte-attempt", "0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).deliver(&test_envelope()).await.unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn client_error_response_is_returned_not_raised() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let response = client_for(&server).deliver(&test_envelope()).await.unwrap();

        assert_eq!(response.status_code, 404);
        assert!(!response.is_success);
        assert_eq!(response.body, "Not Found");
    }

    #[tokio::test]
    async fn server_error_response_is_returned_not_raised() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let response = client_for(&server).deliver(&test_envelope()).await.unwrap();

        assert_eq!(response.status_code, 503);
        assert!(!response.is_success);
    }

    #[tokio::test]
    async fn retry_after_seconds_extracted_from_response() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string("slow down")
                    .append_header("Retry-After", "120"),
            )
            .mount(&server)
            .await;

        let response = client_for(&server).deliver(&test_envelope()).await.unwrap();

        assert_eq!(response.status_code, 429);
        assert_eq!(response.retry_after_seconds, Some(120));
    }

    #[tokio::test]
    async fn connection_refused_maps_to_network_error() {
        // Port 1 is never listening.
        let client = SinkClient::new(SinkConfig {
            url: "http://127.0.0.1:1/ingest".to_string(),
            timeout: Duration::from_secs(2),
            ..SinkConfig::default()
        })
        .unwrap();

        let result = client.deliver(&test_envelope()).await;

        match result {
            Err(error) => assert!(error.is_retryable(), "expected retryable, got {error}"),
            Ok(_) => panic!("expected connection failure"),
        }
    }

    #[test]
    fn invalid_sink_url_rejected_at_construction() {
        let result = SinkClient::new(SinkConfig {
            url: "not a url".to_string(),
            ..SinkConfig::default()
        });

        assert!(matches!(result, Err(DeliveryError::Configuration { .. })));
    }

    #[test]
    fn retry_after_parsing_handles_formats() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(extract_retry_after_seconds(&headers), None);

        headers.insert("retry-after", "120".parse().unwrap());
        assert_eq!(extract_retry_after_seconds(&headers), Some(120));

        headers.insert("retry-after", "not a number".parse().unwrap());
        assert_eq!(extract_retry_after_seconds(&headers), Some(60));
    }
}
