use std::future::Future;
use std::time::Duration;

use opentelemetry::Context;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Request Context
// ============================================================================
//
// Carried through every step of a request: the causal trace context, a
// cancellation token tied to the caller, and an optional deadline. Remote
// calls run under `bound`, so neither a hung collaborator nor a caller that
// went away can keep a step alive.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub trace: Context,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(trace: Context) -> Self {
        Self {
            trace,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// No trace parent, no deadline
    pub fn background() -> Self {
        Self::new(Context::new())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Fail fast if the request is already over
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Run `step` unless the request is cancelled or its deadline passes first
    pub async fn bound<F>(&self, step: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            output = step => Ok(output),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
