//! Boundary to the model execution service.
//!
//! All neural-network work (shape diffusion, surface extraction, texture
//! painting, export encoding) happens behind [`ModelService`]. The orchestrator
//! only passes opaque handles between calls.

use std::fmt;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ServiceError;
use crate::params::OutputFormat;
use crate::planner::ExtractionPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Gpu,
    Cpu,
}

impl Device {
    pub fn other(&self) -> Self {
        match self {
            Self::Gpu => Self::Cpu,
            Self::Cpu => Self::Gpu,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Named model weights whose placement the residency manager controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelName {
    Shape,
    Texture,
}

impl ModelName {
    pub fn id(&self) -> &str {
        match self {
            Self::Shape => "shape",
            Self::Texture => "texture",
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Camera view of an input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Front,
    Back,
    Left,
    Right,
}

impl View {
    pub fn id(&self) -> &str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn all() -> [View; 4] {
        [Self::Front, Self::Back, Self::Left, Self::Right]
    }
}

/// An input image already encoded as PNG, keyed by view.
#[derive(Debug, Clone)]
pub struct InputImage {
    pub view: View,
    pub png: Vec<u8>,
}

/// Input images for one run. A single-view run has only a front image.
#[derive(Debug, Clone, Default)]
pub struct GenerationInputs {
    pub images: Vec<InputImage>,
}

impl GenerationInputs {
    pub fn single(png: Vec<u8>) -> Self {
        Self { images: vec![InputImage { view: View::Front, png }] }
    }
}

/// Image paths handed to shape generation, written into the run's temp area.
#[derive(Debug, Clone, Serialize)]
pub struct ShapeRequest {
    pub views: Vec<(View, PathBuf)>,
    pub seed: u64,
    pub guidance_scale: f32,
    pub inference_steps: u32,
}

impl ShapeRequest {
    pub fn front(&self) -> Option<&Path> {
        self.views
            .iter()
            .find(|(view, _)| *view == View::Front)
            .map(|(_, path)| path.as_path())
    }
}

/// Handle to shape latents held by the model service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latents {
    pub id: String,
    pub device: Device,
}

/// Handle to a mesh held by the model service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mesh {
    pub id: String,
    pub vertices: u64,
    pub faces: u64,
    #[serde(default)]
    pub textured: bool,
}

#[async_trait]
pub trait ModelService: Send + Sync {
    async fn generate_shape(&self, request: &ShapeRequest) -> Result<Latents, ServiceError>;

    async fn decode_mesh(&self, latents: &Latents, plan: ExtractionPlan) -> Result<Mesh, ServiceError>;

    /// Floater removal, degenerate-face removal and face reduction to
    /// `simplify_ratio` of the current face count.
    async fn post_process_mesh(&self, mesh: &Mesh, simplify_ratio: f32) -> Result<Mesh, ServiceError>;

    async fn apply_texture(&self, mesh: &Mesh, image: &Path, texture_size: u32) -> Result<Mesh, ServiceError>;

    async fn export(&self, mesh: &Mesh, format: OutputFormat) -> Result<Vec<u8>, ServiceError>;

    async fn free_memory_bytes(&self, device: Device) -> Result<u64, ServiceError>;

    async fn total_memory_bytes(&self, device: Device) -> Result<u64, ServiceError>;

    async fn move_model(&self, name: ModelName, device: Device) -> Result<(), ServiceError>;

    async fn move_latents(&self, latents: &Latents, device: Device) -> Result<Latents, ServiceError>;
}
