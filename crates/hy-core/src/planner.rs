use serde::{Deserialize, Serialize};
use crate::budget::{ResourceBudget, GIB};
use crate::params::GenerationParameters;

/// Below this much free accelerator memory, high-resolution extraction is split up.
pub const LOW_MEMORY_THRESHOLD_BYTES: u64 = 5 * GIB;
/// Resolutions at or above this are considered expensive.
pub const HIGH_RESOLUTION: u32 = 256;
pub const LOW_MEMORY_RESOLUTION_CAP: u32 = 320;
pub const LOW_MEMORY_MIN_CHUNKS: u32 = 12_000;

pub const FALLBACK_NUM_CHUNKS: u32 = 20_000;
pub const FALLBACK_RESOLUTION_CAP: u32 = 256;

/// Surface extraction parameters for one decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPlan {
    pub num_chunks: u32,
    pub octree_resolution: u32,
}

impl ExtractionPlan {
    pub fn requested(params: &GenerationParameters) -> Self {
        Self {
            num_chunks: params.num_chunks,
            octree_resolution: params.octree_resolution,
        }
    }
}

/// Chooses extraction parameters from the current memory budget.
pub fn plan(params: &GenerationParameters, budget: &ResourceBudget) -> ExtractionPlan {
    let requested = ExtractionPlan::requested(params);

    if budget.free_bytes >= LOW_MEMORY_THRESHOLD_BYTES || requested.octree_resolution < HIGH_RESOLUTION {
        return requested;
    }

    let num_chunks = ((requested.num_chunks as f64 * 1.5).floor() as u32).max(LOW_MEMORY_MIN_CHUNKS);
    let octree_resolution = requested.octree_resolution.min(LOW_MEMORY_RESOLUTION_CAP);

    tracing::info!(
        free_gib = budget.free_gib(),
        num_chunks,
        octree_resolution,
        "Low accelerator memory, splitting mesh extraction"
    );

    ExtractionPlan { num_chunks, octree_resolution }
}

/// Conservative plan for the single retry after an out-of-memory decode.
///
/// The chunk count is fixed regardless of the original request size.
pub fn fallback_plan(params: &GenerationParameters) -> ExtractionPlan {
    ExtractionPlan {
        num_chunks: FALLBACK_NUM_CHUNKS,
        octree_resolution: params.octree_resolution.min(FALLBACK_RESOLUTION_CAP),
    }
}
