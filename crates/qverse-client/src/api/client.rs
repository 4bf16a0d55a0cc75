//! Envelope-unwrapping REST client with retry
//!
//! Default base URL: http://localhost:8080/api
//!
//! # Attempt Outcome
//! - transport failure -> `Network`
//! - body decodes as envelope, `success=true` -> `data` (status not consulted)
//! - body decodes as envelope, `success=false` -> `Api(error)`
//! - body has an `error` string but no envelope -> `Api(error)`
//! - 2xx, other JSON -> `Api("Request failed")`
//! - 2xx, not JSON -> `Parse`
//! - non-2xx, anything else -> `Http { status, reason }`

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::retry::{retry_async, RetryPolicy};
use crate::types::Envelope;
use crate::DEFAULT_API_BASE;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    fn as_method(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method().as_str())
    }
}

/// Per-request options
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub method: HttpMethod,
    /// Pre-serialized JSON body
    pub body: Option<Value>,
    /// Extra headers; replace the JSON defaults of the same name
    pub headers: Vec<(String, String)>,
    /// Additional attempts after the first; `None` uses the client default
    pub retries: Option<u32>,
}

impl RequestOptions {
    pub fn new(method: HttpMethod) -> Self {
        Self { method, ..Self::default() }
    }

    /// Serialize `body` now so encoding errors never consume the retry budget
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ClientError::InvalidRequest(format!("body serialization failed: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// REST client for the Q-Verse API
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Create a client with the default base URL
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_API_BASE)
    }

    /// Create a client with a custom base URL
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Self::from_config(&ClientConfig::default().with_api_base_url(base_url))
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Url::parse(&config.api_base_url)?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::new(config.retries, config.retry_base_delay),
        })
    }

    /// Replace the default retry budget and backoff base
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one logical request, retrying transient failures
    ///
    /// Returns the envelope's `data` decoded as `T`, or the error of the last
    /// attempt once the retry budget is spent.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let headers = build_headers(&options.headers)?;
        let policy = RetryPolicy {
            retries: options.retries.unwrap_or(self.retry.retries),
            base_delay: self.retry.base_delay,
        };

        let data = retry_async(
            &policy,
            |attempt| self.attempt(&url, &options, &headers, attempt),
            ClientError::is_retryable,
        )
        .await
        .map_err(|e| {
            warn!("{} {} failed (retries: {}): {}", options.method, url, policy.retries, e);
            e
        })?;

        serde_json::from_value(data)
            .map_err(|e| ClientError::Parse(format!("unexpected data shape for {}: {}", endpoint, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::new(HttpMethod::Get)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        self.request(endpoint, RequestOptions::new(HttpMethod::Post).json(body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        self.request(endpoint, RequestOptions::new(HttpMethod::Put).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::new(HttpMethod::Delete)).await
    }

    async fn attempt(
        &self,
        url: &str,
        options: &RequestOptions,
        headers: &HeaderMap,
        attempt: u32,
    ) -> Result<Value> {
        debug!("{} {} (attempt {})", options.method, url, attempt);

        let mut builder =
            self.client.request(options.method.as_method(), url).headers(headers.clone());

        if let Some(body) = &options.body {
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await.map_err(|e| ClientError::Network(e.to_string()))?;

        decode_response(status, &text)
    }
}

/// JSON defaults overlaid with caller headers; a caller header replaces a default
fn build_headers(extra: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    for (name, value) in extra {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("invalid header name {:?}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            ClientError::InvalidRequest(format!("invalid value for header {}: {}", name, e))
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Map one HTTP response onto the envelope contract
fn decode_response(status: StatusCode, body: &str) -> Result<Value> {
    if let Ok(envelope) = serde_json::from_str::<Envelope>(body) {
        return envelope.into_data();
    }

    let json = match serde_json::from_str::<Value>(body) {
        Ok(json) => json,
        Err(parse_err) if status.is_success() => {
            return Err(ClientError::Parse(format!("malformed response body: {}", parse_err)));
        }
        Err(_) => return Err(http_error(status)),
    };

    match json.get("error").and_then(|e| e.as_str()) {
        Some(message) => Err(ClientError::Api(message.to_string())),
        None if status.is_success() => Err(ClientError::Api("Request failed".to_string())),
        None => Err(http_error(status)),
    }
}

fn http_error(status: StatusCode) -> ClientError {
    ClientError::Http {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_creation() {
        let client = ApiClient::new();
        assert!(client.is_ok());
    }

    #[test]
    fn test_custom_base_url() {
        let client = ApiClient::with_base_url("https://example.com/api/").unwrap();
        assert_eq!(client.base_url(), "https://example.com/api");
    }

    #[test]
    fn test_relative_base_url_rejected() {
        assert!(matches!(ApiClient::with_base_url("/api"), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_decode_success_ignores_status() {
        let body = r#"{"success":true,"data":{"tps":1200}}"#;
        let data = decode_response(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap();
        assert_eq!(data, json!({"tps": 1200}));
    }

    #[test]
    fn test_decode_envelope_failure() {
        let body = r#"{"success":false,"error":"Price not found"}"#;
        let err = decode_response(StatusCode::NOT_FOUND, body).unwrap_err();
        assert!(matches!(err, ClientError::Api(ref m) if m == "Price not found"));

        let err = decode_response(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, ClientError::Api(_)));
    }

    #[test]
    fn test_decode_non_2xx_without_envelope() {
        let err = decode_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").unwrap_err();
        assert_eq!(err.to_string(), "HTTP 502: Bad Gateway");
    }

    #[test]
    fn test_decode_non_2xx_with_bare_error() {
        let err = decode_response(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"rate limited"}"#)
            .unwrap_err();
        assert!(matches!(err, ClientError::Api(ref m) if m == "rate limited"));
    }

    #[test]
    fn test_decode_malformed_2xx() {
        let err = decode_response(StatusCode::OK, "{not json").unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }

    #[test]
    fn test_decode_2xx_without_success_field() {
        let body = r#"{"error":"Insufficient balance"}"#;
        let err = decode_response(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, ClientError::Api(ref m) if m == "Insufficient balance"));

        let err = decode_response(StatusCode::OK, r#"{"balance":10}"#).unwrap_err();
        assert_eq!(err.to_string(), "API error: Request failed");
    }

    #[test]
    fn test_caller_headers_replace_defaults() {
        let headers = build_headers(&[
            ("Content-Type".to_string(), "application/vnd.qverse+json".to_string()),
            ("X-Request-Id".to_string(), "abc".to_string()),
        ])
        .unwrap();

        let content_types: Vec<_> = headers.get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(content_types, vec!["application/vnd.qverse+json"]);
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
        assert_eq!(headers.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn test_invalid_header_rejected() {
        let err = build_headers(&[("bad header".to_string(), "x".to_string())]).unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));

        let err = build_headers(&[("X-Ok".to_string(), "line\nbreak".to_string())]).unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new(HttpMethod::Post)
            .json(&json!({"username": "alice"}))
            .unwrap()
            .header("X-Request-Id", "abc")
            .retries(0);
        assert_eq!(options.method, HttpMethod::Post);
        assert_eq!(options.body, Some(json!({"username": "alice"})));
        assert_eq!(options.headers, vec![("X-Request-Id".to_string(), "abc".to_string())]);
        assert_eq!(options.retries, Some(0));
        assert_eq!(RequestOptions::default().method, HttpMethod::Get);
    }
}
