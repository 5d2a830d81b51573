use std::sync::Arc;
use serde::Serialize;
use crate::error::ServiceError;
use crate::service::{Device, ModelService};

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceBudget {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl ResourceBudget {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    pub fn free_gib(&self) -> f64 {
        self.free_bytes as f64 / GIB as f64
    }
}

/// Queries accelerator memory through the model service.
#[derive(Clone)]
pub struct BudgetProbe {
    service: Arc<dyn ModelService>,
    device: Device,
}

impl BudgetProbe {
    pub fn new(service: Arc<dyn ModelService>) -> Self {
        Self { service, device: Device::Gpu }
    }

    pub async fn probe(&self) -> Result<ResourceBudget, ServiceError> {
        let total_bytes = self.service.total_memory_bytes(self.device).await?;
        let free_bytes = self.service.free_memory_bytes(self.device).await?;

        let budget = ResourceBudget { total_bytes, free_bytes };
        tracing::debug!(
            device = %self.device,
            total_bytes,
            free_bytes,
            "Probed accelerator memory ({:.1} GiB free)",
            budget.free_gib()
        );
        Ok(budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedModelService;

    #[tokio::test]
    async fn test_probe_reads_service_memory() {
        let service = Arc::new(ScriptedModelService::new().with_memory(24 * GIB, 3 * GIB));
        let budget = BudgetProbe::new(service).probe().await.unwrap();
        assert_eq!(budget.total_bytes, 24 * GIB);
        assert_eq!(budget.free_bytes, 3 * GIB);
        assert_eq!(budget.used_bytes(), 21 * GIB);
    }
}
