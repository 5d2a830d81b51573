//! Mesh decode strategies.
//!
//! The orchestrator picks one [`MeshDecoder`] at construction time.
//! [`StandardDecoder`] decodes with the requested parameters once.
//! [`MemoryAdaptiveDecoder`] plans from the memory budget and retries a single
//! out-of-memory failure with the conservative fallback plan.

use std::sync::Arc;
use async_trait::async_trait;
use crate::budget::BudgetProbe;
use crate::error::{GenError, Result, ServiceError};
use crate::params::GenerationParameters;
use crate::planner::{self, ExtractionPlan};
use crate::service::{Device, Latents, Mesh, ModelService};

#[async_trait]
pub trait MeshDecoder: Send + Sync {
    fn name(&self) -> &str;

    async fn decode(&self, latents: &Latents, params: &GenerationParameters) -> Result<Mesh>;
}

fn classify_final(err: ServiceError) -> GenError {
    match err {
        ServiceError::ResourceExhausted { detail } => {
            GenError::Unrecoverable(format!("out of memory during mesh decode: {detail}"))
        }
        other => other.into(),
    }
}

pub struct StandardDecoder {
    service: Arc<dyn ModelService>,
}

impl StandardDecoder {
    pub fn new(service: Arc<dyn ModelService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MeshDecoder for StandardDecoder {
    fn name(&self) -> &str {
        "standard"
    }

    async fn decode(&self, latents: &Latents, params: &GenerationParameters) -> Result<Mesh> {
        self.service
            .decode_mesh(latents, ExtractionPlan::requested(params))
            .await
            .map_err(classify_final)
    }
}

pub struct MemoryAdaptiveDecoder {
    service: Arc<dyn ModelService>,
    probe: BudgetProbe,
}

impl MemoryAdaptiveDecoder {
    pub fn new(service: Arc<dyn ModelService>) -> Self {
        let probe = BudgetProbe::new(service.clone());
        Self { service, probe }
    }

    async fn primary_plan(&self, params: &GenerationParameters) -> ExtractionPlan {
        match self.probe.probe().await {
            Ok(budget) => planner::plan(params, &budget),
            Err(e) => {
                tracing::warn!(error = %e, "Memory probe failed, decoding with requested parameters");
                ExtractionPlan::requested(params)
            }
        }
    }

    /// Round-trips the latents through host memory so the device allocator
    /// can compact before the retry.
    async fn compact(&self, latents: &Latents) -> Result<Latents> {
        let home = latents.device;
        let on_host = self
            .service
            .move_latents(latents, Device::Cpu)
            .await
            .map_err(classify_final)?;
        self.service
            .move_latents(&on_host, home)
            .await
            .map_err(classify_final)
    }
}

#[async_trait]
impl MeshDecoder for MemoryAdaptiveDecoder {
    fn name(&self) -> &str {
        "memory_adaptive"
    }

    async fn decode(&self, latents: &Latents, params: &GenerationParameters) -> Result<Mesh> {
        let plan = self.primary_plan(params).await;
        tracing::debug!(num_chunks = plan.num_chunks, octree_resolution = plan.octree_resolution, "Decoding mesh");

        match self.service.decode_mesh(latents, plan).await {
            Ok(mesh) => Ok(mesh),
            Err(ServiceError::ResourceExhausted { detail }) => {
                let fallback = planner::fallback_plan(params);
                tracing::warn!(
                    %detail,
                    num_chunks = fallback.num_chunks,
                    octree_resolution = fallback.octree_resolution,
                    "Out of memory during mesh decode, retrying once with fallback plan"
                );

                let latents = self.compact(latents).await?;
                self.service
                    .decode_mesh(&latents, fallback)
                    .await
                    .map_err(classify_final)
            }
            Err(other) => Err(other.into()),
        }
    }
}
