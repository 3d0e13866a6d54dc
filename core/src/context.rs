use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Cancellation-carrying, deadline-bounded scope for one action call.
///
/// Clones share the same cancellation token; the deadline is a plain value
/// copied into each clone.
#[derive(Clone)]
pub struct ActionContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ActionContext {
    /// A context that never expires on its own.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Err if the context has been cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), Error> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }

    pub(crate) fn error(&self) -> Error {
        self.check().err().unwrap_or(Error::Cancelled)
    }

    /// Resolves once the context is cancelled or past its deadline.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            },
            None => self.token.cancelled().await,
        }
    }

    /// Race a future against this context. The losing future is dropped, so an
    /// in-flight HTTP request or child process wait aborts at the deadline.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::select! {
            _ = self.done() => Err(self.error()),
            out = fut => out,
        }
    }
}
