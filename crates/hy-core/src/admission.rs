use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use crate::error::{GenError, Result};

/// Single-slot admission. A second caller is turned away, never queued.
#[derive(Debug, Clone, Default)]
pub struct AdmissionController {
    busy: Arc<AtomicBool>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_admit(&self) -> Result<AdmissionPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| GenError::Busy)?;

        Ok(AdmissionPermit {
            busy: self.busy.clone(),
            released: false,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding the slot. Dropping it releases the slot, so every exit
/// path of a run releases exactly once.
#[derive(Debug)]
pub struct AdmissionPermit {
    busy: Arc<AtomicBool>,
    released: bool,
}

impl AdmissionPermit {
    pub fn release(mut self) {
        self.release_slot();
    }

    fn release_slot(&mut self) {
        if !self.released {
            self.released = true;
            self.busy.store(false, Ordering::Release);
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release_slot();
    }
}
