//! Per-send cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DeliveryError;

/// Cancellation signal plus optional deadline for one `send` call.
///
/// Both the HTTP round trip and the wait between retries race against this
/// context, so a send returns promptly once it is cancelled or expired.
#[derive(Debug, Clone, Default)]
pub struct SendContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl SendContext {
    /// A context that never expires and is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now. A timeout past the clock's range never expires.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Expire at an absolute instant.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Tie this context to an external cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(DeliveryError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context ends first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeliveryError> {
        self.check()?;

        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DeliveryError::Cancelled),
            _ = expiry => Err(DeliveryError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}
