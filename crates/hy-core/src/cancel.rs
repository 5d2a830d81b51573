use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use crate::error::{GenError, Result};

/// Result of an interrupt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    NotRunning,
    Requested,
    AlreadyRequested,
}

/// Holds the cancellation token of the current run.
///
/// A fresh token is installed at every admission, so a cancel aimed at a
/// finished run never leaks into the next one. Admission and cancel requests
/// serialise on the same lock: a request that sees the slot taken always
/// reaches the token of the run holding it.
#[derive(Debug, Default)]
pub struct CancellationCoordinator {
    token: Mutex<CancellationToken>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        match self.token.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs `admit` and, if it succeeds, clears cancellation by installing a
    /// fresh token for the admitted run.
    pub fn arm<T>(&self, admit: impl FnOnce() -> Result<T>) -> Result<(T, CancellationToken)> {
        let mut current = self.lock();
        let admitted = admit()?;
        let fresh = CancellationToken::new();
        *current = fresh.clone();
        Ok((admitted, fresh))
    }

    /// Cancels the current token if `is_active` reports a run holding the
    /// slot. Idempotent.
    pub fn request_cancel(&self, is_active: impl FnOnce() -> bool) -> CancelOutcome {
        let current = self.lock();
        if !is_active() {
            return CancelOutcome::NotRunning;
        }
        if current.is_cancelled() {
            return CancelOutcome::AlreadyRequested;
        }
        current.cancel();
        CancelOutcome::Requested
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.lock().is_cancelled()
    }
}

/// Stage boundary check.
pub fn checkpoint(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(GenError::Cancelled);
    }
    Ok(())
}
