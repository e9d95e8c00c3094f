//! Chat-robot webhook client
//!
//! Sends text, link, markdown, action-card and feed-card messages to a
//! DingTalk-style group robot. Requests are signed with HMAC-SHA256 when a
//! secret is configured, and transport failures are retried with linear
//! backoff. API-level rejections (`errcode != 0`) are returned immediately.
//!
//! ```no_run
//! use webhook_notifier::{Message, NotifierClient, SendContext};
//!
//! # async fn demo() -> Result<(), webhook_notifier::DeliveryError> {
//! let client = NotifierClient::builder()
//!     .access_token("token")
//!     .sign_secret("secret")
//!     .build()?;
//!
//! let message = Message::text("disk usage above 90%").at_all();
//! client.send(message, &SendContext::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod message;
pub mod sign;
pub mod transport;

pub use client::{NotifierClient, NotifierClientBuilder};
pub use context::SendContext;
pub use error::DeliveryError;
pub use message::{
    ActionCardBuilder, AtTarget, Button, ButtonOrientation, FeedCardBuilder, FeedLink,
    LinkBuilder, MarkdownBuilder, Message, TextBuilder,
};
pub use sign::calculate_sign;
pub use transport::{HttpTransport, RawResponse, Transport};

/// Default robot API host
pub const DEFAULT_HOST: &str = "oapi.dingtalk.com";

/// User-Agent sent with every request
pub const USER_AGENT: &str = "DingTalk-Robot-SDK/2.0";
