//! Root cancellation with a first-wins cause

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::CoreError;

/// The pipeline's root cancellation context.
///
/// Any stage or watcher may cancel with a cause; the first non-nil cause
/// wins and becomes the pipeline's exit error. Every blocking call in the
/// system is selectable against the token.
#[derive(Debug, Clone, Default)]
pub struct CancelCause {
    token: CancellationToken,
    cause: Arc<Mutex<Option<CoreError>>>,
}

impl CancelCause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the pipeline. Only the first submitted cause is kept.
    pub fn cancel(&self, cause: CoreError) {
        {
            let mut slot = self.cause.lock();
            if slot.is_none() {
                debug!(%cause, "pipeline cancelled");
                *slot = Some(cause);
            }
        }
        self.token.cancel();
    }

    /// Cancel without recording a cause (clean shutdown request)
    pub fn cancel_clean(&self) {
        self.token.cancel();
    }

    /// The underlying token, for `select!` arms and child tokens
    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether cancellation has been requested
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for cancellation
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Remove and return the recorded cause, if any
    pub fn take_cause(&self) -> Option<CoreError> {
        self.cause.lock().take()
    }
}
