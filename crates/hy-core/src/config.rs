use std::path::PathBuf;
use crate::service::Device;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub output_dir: PathBuf,
    /// Keep shape and texture models off the GPU at the same time and plan
    /// mesh extraction from the free memory budget.
    pub low_vram: bool,
    pub shape_device: Device,
    pub texture_device: Device,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            low_vram: true,
            shape_device: Device::Gpu,
            texture_device: Device::Cpu,
        }
    }
}
