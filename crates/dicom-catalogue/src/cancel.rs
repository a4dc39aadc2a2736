//! Cancellation tokens for catalogue builds.
//!
//! A token is a shared flag: the caller keeps one clone and calls
//! [`CancellationToken::cancel`], the build checks its own clone between
//! directories during discovery and before every extraction task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CatalogueError, Result};

/// A cancellation token for aborting a long-running build.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Some(())` while still active, `None` once cancelled.
    ///
    /// This enables use with the `?` operator inside functions returning `Option`.
    #[inline]
    pub fn active(&self) -> Option<()> {
        if self.is_cancelled() {
            None
        } else {
            Some(())
        }
    }

    /// Returns `Err(CatalogueError::Cancelled)` once cancelled.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CatalogueError::Cancelled)
        } else {
            Ok(())
        }
    }
}
