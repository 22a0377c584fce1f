//! Per-call deadline and cancellation.
//!
//! Backends check the context on entry and before every statement they issue. A context
//! that is already canceled or past its deadline is a hard error; it is never ignored.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::error::{StoreError, StoreResult};

/// Deadline and cancellation state for a single call.
///
/// Cloning a context shares its cancel flag.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    canceled: Option<Arc<AtomicBool>>,
}

impl CallContext {
    /// A context that never expires and cannot be canceled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline: Some(deadline), canceled: None }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Returns a cancelable copy of this context together with the handle that cancels it.
    pub fn cancelable(self) -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));

        (
            Self { deadline: self.deadline, canceled: Some(flag.clone()) },
            CancelHandle { flag },
        )
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with [`StoreError::Canceled`] once the context is canceled or expired.
    pub fn check(&self) -> StoreResult<()> {
        if let Some(flag) = &self.canceled {
            if flag.load(Ordering::Acquire) {
                return Err(StoreError::Canceled("call context was canceled".into()));
            }
        }

        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StoreError::Canceled("call context deadline exceeded".into()));
            }
        }

        Ok(())
    }
}

/// Cancels every clone of the [`CallContext`] it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
