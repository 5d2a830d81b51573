//! GPU/CPU placement of named model weights.
//!
//! Under the low-VRAM policy the shape and texture models are never GPU
//! resident at the same time: bringing one onto the GPU first moves every
//! other GPU-resident model to the CPU.
//!
//! The placement recorded at registration is the one every run restores to.
//! A run that fails to restore it does not move that target.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use crate::error::{GenError, Result};
use crate::service::{Device, ModelName, ModelService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelResidency {
    pub current: Device,
    pub restore_to: Device,
}

pub struct ResidencyManager {
    service: Arc<dyn ModelService>,
    models: Mutex<BTreeMap<ModelName, ModelResidency>>,
    low_vram: bool,
}

impl ResidencyManager {
    pub fn new(service: Arc<dyn ModelService>, low_vram: bool) -> Self {
        Self {
            service,
            models: Mutex::new(BTreeMap::new()),
            low_vram,
        }
    }

    fn models(&self) -> MutexGuard<'_, BTreeMap<ModelName, ModelResidency>> {
        match self.models.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records where a model was loaded at startup.
    pub fn register(&self, name: ModelName, device: Device) {
        self.models().insert(name, ModelResidency { current: device, restore_to: device });
    }

    pub fn current_device(&self, name: ModelName) -> Option<Device> {
        self.models().get(&name).map(|r| r.current)
    }

    pub fn restore_target(&self, name: ModelName) -> Option<Device> {
        self.models().get(&name).map(|r| r.restore_to)
    }

    /// Whether any model sits away from its registered placement.
    pub fn is_displaced(&self) -> bool {
        self.models().values().any(|r| r.current != r.restore_to)
    }

    pub async fn ensure_resident(&self, name: ModelName, device: Device) -> Result<()> {
        let current = self
            .current_device(name)
            .ok_or_else(|| GenError::Resource(format!("model '{name}' is not registered")))?;
        if current == device {
            return Ok(());
        }

        if device == Device::Gpu && self.low_vram {
            let others: Vec<ModelName> = self
                .models()
                .iter()
                .filter(|(other, r)| **other != name && r.current == Device::Gpu)
                .map(|(other, _)| *other)
                .collect();
            for other in others {
                self.move_model(other, Device::Cpu).await?;
            }
        }

        self.move_model(name, device).await
    }

    /// Moves the model off `device` if it is there.
    pub async fn release_from(&self, name: ModelName, device: Device) -> Result<()> {
        if self.current_device(name) == Some(device) {
            self.ensure_resident(name, device.other()).await?;
        }
        Ok(())
    }

    /// Moves every model back to its registered placement. Offloads go first
    /// so the low-VRAM invariant holds in between.
    pub async fn restore(&self) -> Result<()> {
        let mut pending: Vec<(ModelName, Device)> = self
            .models()
            .iter()
            .filter(|(_, r)| r.current != r.restore_to)
            .map(|(name, r)| (*name, r.restore_to))
            .collect();
        pending.sort_by_key(|(_, device)| *device == Device::Gpu);

        for (name, device) in pending {
            self.ensure_resident(name, device).await?;
        }
        Ok(())
    }

    async fn move_model(&self, name: ModelName, device: Device) -> Result<()> {
        let started = Instant::now();
        tracing::info!(model = %name, to = %device, "Moving model");

        self.service
            .move_model(name, device)
            .await
            .map_err(|e| GenError::Resource(format!("moving {name} model to {device}: {e}")))?;

        if let Some(residency) = self.models().get_mut(&name) {
            residency.current = device;
        }
        tracing::info!(
            model = %name,
            to = %device,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model moved"
        );
        Ok(())
    }
}
