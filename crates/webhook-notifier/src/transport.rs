//! HTTP transport for robot requests
//!
//! Abstracts the POST round trip so the retry loop can be driven by a
//! scripted transport in tests. `HttpTransport` is the reqwest-backed
//! production implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT as USER_AGENT_HEADER};
use url::Url;

use crate::error::DeliveryError;
use crate::USER_AGENT;

/// Status and body of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One POST of a JSON payload
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` to `url` and return the raw response.
    ///
    /// Non-2xx statuses are returned as `Ok`; classification happens in the
    /// client. `Err` is reserved for failures below HTTP.
    async fn post_json(&self, url: &Url, body: Vec<u8>) -> Result<RawResponse, DeliveryError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (proxy, custom TLS, shared pool).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &Url, body: Vec<u8>) -> Result<RawResponse, DeliveryError> {
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header(USER_AGENT_HEADER, USER_AGENT)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        assert!(RawResponse::new(200, "").is_success());
        assert!(RawResponse::new(204, "").is_success());
        assert!(!RawResponse::new(302, "").is_success());
        assert!(!RawResponse::new(500, "").is_success());
    }
}
