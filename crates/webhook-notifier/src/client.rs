//! Robot client with signing and bounded retry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::context::SendContext;
use crate::error::DeliveryError;
use crate::message::Message;
use crate::sign::calculate_sign;
use crate::transport::{HttpTransport, Transport};
use crate::DEFAULT_HOST;

/// Default HTTP request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries after the first attempt
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default base interval for linear backoff
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// `{errcode, errmsg}` envelope returned by the robot API
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Group robot client.
///
/// Immutable after construction; share it behind an `Arc` or clone the
/// transport handle freely. Each [`send`](Self::send) is independent.
pub struct NotifierClient {
    sign_secret: Option<String>,
    webhook_url: Url,
    timeout: Duration,
    retry_count: u32,
    retry_interval: Duration,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for NotifierClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierClient")
            .field("host", &self.webhook_url.host_str())
            .field("signed", &self.sign_secret.is_some())
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl NotifierClient {
    pub fn builder() -> NotifierClientBuilder {
        NotifierClientBuilder::default()
    }

    /// Build a client from `DINGTALK_ACCESS_TOKEN_{LEVEL}` and
    /// `DINGTALK_SECRET_{LEVEL}`.
    pub fn from_env(level: &str) -> Result<Self, DeliveryError> {
        NotifierClientBuilder::from_env(level)?.build()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn is_signed(&self) -> bool {
        self.sign_secret.is_some()
    }

    /// Deliver `message`, retrying transport failures.
    ///
    /// Attempt `n > 0` is preceded by a wait of `n * retry_interval`. API
    /// rejections, cancellation and deadline expiry are returned as-is.
    pub async fn send(
        &self,
        message: impl Into<Message>,
        ctx: &SendContext,
    ) -> Result<(), DeliveryError> {
        let message = message.into();
        let msg_type = message.msg_type();
        let payload = message.to_json().map_err(DeliveryError::Encode)?;

        let mut attempt: u32 = 0;
        loop {
            ctx.check()?;

            if attempt > 0 {
                let backoff = self.backoff(attempt);
                debug!(msg_type, attempt, ?backoff, "waiting before retry");
                ctx.run(tokio::time::sleep(backoff)).await?;
            }

            let url = self.request_url(chrono::Utc::now().timestamp_millis());
            match ctx.run(self.attempt(&url, payload.clone())).await? {
                Ok(()) => {
                    debug!(msg_type, attempt, "robot message delivered");
                    return Ok(());
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(msg_type, attempt, error = %err, "robot delivery attempt failed");
                    if attempt >= self.retry_count {
                        return Err(DeliveryError::RetriesExhausted {
                            retries: self.retry_count,
                            last: Box::new(err),
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One POST plus response classification.
    async fn attempt(&self, url: &Url, payload: Vec<u8>) -> Result<(), DeliveryError> {
        let response = self.transport.post_json(url, payload).await?;

        if !response.is_success() {
            return Err(DeliveryError::HttpStatus {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let result: ApiResponse = serde_json::from_slice(&response.body)?;
        if result.errcode != 0 {
            return Err(DeliveryError::Api {
                code: result.errcode,
                message: result.errmsg,
            });
        }

        Ok(())
    }

    /// Webhook URL for a request made at `timestamp_ms`.
    /// Linear backoff before retry `attempt`, saturating at `Duration::MAX`
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_interval
            .checked_mul(attempt)
            .unwrap_or(Duration::MAX)
    }

    fn request_url(&self, timestamp_ms: i64) -> Url {
        let mut url = self.webhook_url.clone();
        if let Some(secret) = self.sign_secret.as_deref() {
            let sign = calculate_sign(secret, timestamp_ms);
            url.query_pairs_mut()
                .append_pair("timestamp", &timestamp_ms.to_string())
                .append_pair("sign", &sign);
        }
        url
    }
}

/// Builder for [`NotifierClient`]
pub struct NotifierClientBuilder {
    access_token: String,
    sign_secret: Option<String>,
    base_url: String,
    timeout: Duration,
    retry_count: u32,
    retry_interval: Duration,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for NotifierClientBuilder {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            sign_secret: None,
            base_url: format!("https://{}", DEFAULT_HOST),
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            transport: None,
        }
    }
}

impl NotifierClientBuilder {
    /// Seed a builder from `DINGTALK_ACCESS_TOKEN_{LEVEL}` and
    /// `DINGTALK_SECRET_{LEVEL}`. Both must be set and non-empty.
    pub fn from_env(level: &str) -> Result<Self, DeliveryError> {
        Self::from_lookup(level, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        level: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DeliveryError> {
        let level = level.to_uppercase();
        let token_key = format!("DINGTALK_ACCESS_TOKEN_{}", level);
        let secret_key = format!("DINGTALK_SECRET_{}", level);

        let token = lookup(&token_key)
            .filter(|v| !v.is_empty())
            .ok_or(DeliveryError::MissingEnv(token_key))?;
        let secret = lookup(&secret_key)
            .filter(|v| !v.is_empty())
            .ok_or(DeliveryError::MissingEnv(secret_key))?;

        Ok(Self::default().access_token(token).sign_secret(secret))
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    /// Enable request signing. An empty secret disables it.
    pub fn sign_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.sign_secret = if secret.is_empty() { None } else { Some(secret) };
        self
    }

    /// API host, reached over HTTPS.
    pub fn host(mut self, host: impl AsRef<str>) -> Self {
        self.base_url = format!("https://{}", host.as_ref());
        self
    }

    /// Full scheme + authority (+ optional path prefix) of the API.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retries after the first attempt; 0 sends exactly once.
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Replace the default reqwest transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<NotifierClient, DeliveryError> {
        let mut webhook_url = Url::parse(&self.base_url)?;
        let path = format!("{}/robot/send", webhook_url.path().trim_end_matches('/'));
        webhook_url.set_path(&path);
        webhook_url
            .query_pairs_mut()
            .clear()
            .append_pair("access_token", &self.access_token);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.timeout)?),
        };

        Ok(NotifierClient {
            sign_secret: self.sign_secret,
            webhook_url,
            timeout: self.timeout,
            retry_count: self.retry_count,
            retry_interval: self.retry_interval,
            transport,
        })
    }
}
