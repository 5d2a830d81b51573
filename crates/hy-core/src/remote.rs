//! [`ModelService`] backed by an out-of-process model worker over HTTP.
//!
//! The worker shares the output directory with this process, so images and
//! meshes travel as paths and handles rather than payloads. Only the final
//! export comes back as bytes.

use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::error::ServiceError;
use crate::params::OutputFormat;
use crate::planner::ExtractionPlan;
use crate::service::{Device, Latents, Mesh, ModelName, ModelService, ShapeRequest};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WorkerErrorKind {
    ResourceExhausted,
    InvalidInput,
    #[serde(other)]
    Internal,
}

#[derive(Debug, Deserialize)]
struct WorkerError {
    kind: WorkerErrorKind,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Deserialize)]
struct MemoryInfo {
    total_bytes: u64,
    free_bytes: u64,
}

#[derive(Serialize)]
struct DecodeRequest<'a> {
    latents_id: &'a str,
    num_chunks: u32,
    octree_resolution: u32,
}

#[derive(Serialize)]
struct PostProcessRequest<'a> {
    mesh_id: &'a str,
    simplify_ratio: f32,
}

#[derive(Serialize)]
struct TextureRequest<'a> {
    mesh_id: &'a str,
    image_path: &'a Path,
    texture_size: u32,
}

#[derive(Serialize)]
struct ExportRequest<'a> {
    mesh_id: &'a str,
    format: OutputFormat,
}

#[derive(Serialize)]
struct MoveRequest {
    device: Device,
}

/// Maps a non-success worker response to a typed error. Out-of-memory is
/// signalled by status 507 or an explicit error kind, never by message text.
fn error_from_response(status: StatusCode, body: &[u8]) -> ServiceError {
    let parsed: Option<WorkerError> = serde_json::from_slice(body).ok();
    let detail = match &parsed {
        Some(err) if !err.detail.is_empty() => err.detail.clone(),
        _ => format!("worker returned {status}"),
    };

    match parsed.map(|e| e.kind) {
        Some(WorkerErrorKind::ResourceExhausted) => ServiceError::ResourceExhausted { detail },
        Some(WorkerErrorKind::InvalidInput) => ServiceError::InvalidInput(detail),
        _ if status == StatusCode::INSUFFICIENT_STORAGE => ServiceError::ResourceExhausted { detail },
        _ if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY => {
            ServiceError::InvalidInput(detail)
        }
        _ => ServiceError::Backend(detail),
    }
}

pub struct RemoteModelService {
    client: Client,
    base_url: String,
}

impl RemoteModelService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: Response) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(error_from_response(status, &body))
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, ServiceError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::Backend(format!("malformed worker response: {e}")))
    }

    async fn memory(&self, device: Device) -> Result<MemoryInfo, ServiceError> {
        let response = self
            .client
            .get(self.url("/memory"))
            .query(&[("device", device.to_string())])
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::Backend(format!("malformed memory report: {e}")))
    }
}

#[async_trait]
impl ModelService for RemoteModelService {
    async fn generate_shape(&self, request: &ShapeRequest) -> Result<Latents, ServiceError> {
        self.post("/shape", request).await
    }

    async fn decode_mesh(&self, latents: &Latents, plan: ExtractionPlan) -> Result<Mesh, ServiceError> {
        let body = DecodeRequest {
            latents_id: &latents.id,
            num_chunks: plan.num_chunks,
            octree_resolution: plan.octree_resolution,
        };
        self.post("/decode", &body).await
    }

    async fn post_process_mesh(&self, mesh: &Mesh, simplify_ratio: f32) -> Result<Mesh, ServiceError> {
        self.post("/postprocess", &PostProcessRequest { mesh_id: &mesh.id, simplify_ratio }).await
    }

    async fn apply_texture(&self, mesh: &Mesh, image: &Path, texture_size: u32) -> Result<Mesh, ServiceError> {
        let body = TextureRequest { mesh_id: &mesh.id, image_path: image, texture_size };
        self.post("/texture", &body).await
    }

    async fn export(&self, mesh: &Mesh, format: OutputFormat) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .client
            .post(self.url("/export"))
            .json(&ExportRequest { mesh_id: &mesh.id, format })
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let bytes = Self::check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn free_memory_bytes(&self, device: Device) -> Result<u64, ServiceError> {
        Ok(self.memory(device).await?.free_bytes)
    }

    async fn total_memory_bytes(&self, device: Device) -> Result<u64, ServiceError> {
        Ok(self.memory(device).await?.total_bytes)
    }

    async fn move_model(&self, name: ModelName, device: Device) -> Result<(), ServiceError> {
        let _: serde_json::Value = self.post(&format!("/models/{}/move", name.id()), &MoveRequest { device }).await?;
        Ok(())
    }

    async fn move_latents(&self, latents: &Latents, device: Device) -> Result<Latents, ServiceError> {
        self.post(&format!("/latents/{}/move", latents.id), &MoveRequest { device }).await
    }
}
