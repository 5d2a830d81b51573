//! Single-slot orchestration of image-to-3D generation runs.
//!
//! [`OrchestratorContext`] owns admission, status, cancellation and model
//! residency, and drives each admitted run through shape generation, mesh
//! extraction, optional texturing and export against a [`ModelService`].

pub mod admission;
pub mod budget;
pub mod cancel;
pub mod config;
pub mod decoder;
pub mod error;
pub mod files;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod params;
pub mod pipeline;
pub mod planner;
pub mod remote;
pub mod residency;
pub mod service;
pub mod status;

pub use config::OrchestratorConfig;
pub use error::{ErrorKind, GenError, ServiceError};
pub use params::{GenerationParameters, OutputFormat, Validated};
pub use pipeline::{OrchestratorContext, RunHandle, StatusReport};
pub use service::{Device, GenerationInputs, InputImage, ModelName, ModelService, View};
pub use status::{GenerationState, GenerationStatus, CANCELLED_MESSAGE};
