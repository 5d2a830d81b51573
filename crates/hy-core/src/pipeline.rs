//! Single-slot generation pipeline.
//!
//! ```text
//! Validated → ShapeGenerated → MeshExtracted → (Textured) → Exported
//! ```
//!
//! One run at a time holds the [`AdmissionPermit`]. The run executes on its
//! own tokio task and is the only writer of the [`StateMachine`]; callers poll
//! [`OrchestratorContext::get_status`] or await the [`RunHandle`].
//!
//! Cancellation is checked only at stage boundaries. An in-flight model call
//! always runs to completion.
//!
//! Every exit path restores model residency, removes the run's temp files
//! (keeping the export only on success), finalises the status and then
//! releases the permit. A run whose restore fails is reported as a resource
//! failure even if every stage succeeded.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::admission::{AdmissionController, AdmissionPermit};
use crate::cancel::{checkpoint, CancelOutcome, CancellationCoordinator};
use crate::config::OrchestratorConfig;
use crate::decoder::{MemoryAdaptiveDecoder, MeshDecoder, StandardDecoder};
use crate::error::{GenError, Result};
use crate::files::{FileManager, ModelArtifact, RunFiles};
use crate::params::{GenerationParameters, Validated};
use crate::residency::ResidencyManager;
use crate::service::{Device, GenerationInputs, Latents, Mesh, ModelName, ModelService, ShapeRequest, View};
use crate::status::{GenerationStatus, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validated,
    ShapeGenerated,
    MeshExtracted,
    Textured,
    Exported,
}

impl PipelineStage {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Validated => "validated",
            Self::ShapeGenerated => "shape_generated",
            Self::MeshExtracted => "mesh_extracted",
            Self::Textured => "textured",
            Self::Exported => "exported",
        }
    }
}

/// What `/status` and `/ping` report.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReport {
    pub status: GenerationStatus,
    pub progress: u8,
    pub message: String,
    pub busy: bool,
}

/// Completion signal of an admitted run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    done: oneshot::Receiver<Result<ModelArtifact>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn wait(self) -> Result<ModelArtifact> {
        self.done
            .await
            .unwrap_or_else(|_| Err(GenError::Unrecoverable("run task ended without reporting".into())))
    }
}

/// Everything the service shares across requests, built once at startup.
pub struct OrchestratorContext {
    service: Arc<dyn ModelService>,
    admission: AdmissionController,
    state: Arc<StateMachine>,
    cancel: CancellationCoordinator,
    residency: ResidencyManager,
    decoder: Box<dyn MeshDecoder>,
    files: FileManager,
}

impl OrchestratorContext {
    pub fn new(service: Arc<dyn ModelService>, config: OrchestratorConfig) -> Self {
        let residency = ResidencyManager::new(service.clone(), config.low_vram);

        let mut texture_device = config.texture_device;
        if config.low_vram && config.shape_device == Device::Gpu && texture_device == Device::Gpu {
            tracing::warn!("Low-VRAM mode keeps one model on the GPU; texture model starts on the CPU");
            texture_device = Device::Cpu;
        }
        residency.register(ModelName::Shape, config.shape_device);
        residency.register(ModelName::Texture, texture_device);

        let decoder: Box<dyn MeshDecoder> = if config.low_vram {
            Box::new(MemoryAdaptiveDecoder::new(service.clone()))
        } else {
            Box::new(StandardDecoder::new(service.clone()))
        };
        tracing::info!(decoder = decoder.name(), low_vram = config.low_vram, "Orchestrator ready");

        Self {
            service,
            admission: AdmissionController::new(),
            state: Arc::new(StateMachine::new()),
            cancel: CancellationCoordinator::new(),
            residency,
            decoder,
            files: FileManager::new(config.output_dir),
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn MeshDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn state(&self) -> &Arc<StateMachine> {
        &self.state
    }

    pub fn residency(&self) -> &ResidencyManager {
        &self.residency
    }

    pub fn is_busy(&self) -> bool {
        self.admission.is_busy()
    }

    pub fn get_status(&self) -> StatusReport {
        let state = self.state.snapshot();
        StatusReport {
            status: state.status,
            progress: state.progress,
            message: state.message,
            busy: self.admission.is_busy(),
        }
    }

    /// Asks the active run to stop at its next stage boundary. Returns
    /// `false` when nothing is running.
    pub fn interrupt(&self) -> bool {
        match self.cancel.request_cancel(|| self.admission.is_busy()) {
            CancelOutcome::NotRunning => {
                tracing::info!("Interrupt requested with no generation running");
                false
            }
            CancelOutcome::Requested => {
                tracing::info!(run_id = ?self.state.snapshot().run_id, "Cancellation requested");
                true
            }
            CancelOutcome::AlreadyRequested => true,
        }
    }

    /// The export of the last run, if that run completed.
    pub fn last_artifact(&self) -> Option<ModelArtifact> {
        let state = self.state.snapshot();
        match state.status {
            GenerationStatus::Complete => state.artifact,
            _ => None,
        }
    }

    pub async fn read_artifact(&self) -> Result<Option<(ModelArtifact, Vec<u8>)>> {
        let Some(artifact) = self.last_artifact() else {
            return Ok(None);
        };
        match artifact.read().await {
            Ok(bytes) => Ok(Some((artifact, bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Admits a run and starts it in the background. Fails with
    /// [`GenError::Busy`] without touching the status when a run is active.
    pub fn submit(
        self: &Arc<Self>,
        inputs: GenerationInputs,
        params: Validated<GenerationParameters>,
    ) -> Result<RunHandle> {
        check_inputs(&inputs)?;

        let (permit, token) = self.cancel.arm(|| self.admission.try_admit())?;
        let run_id = Uuid::new_v4();
        self.state.reset(run_id);

        let (tx, rx) = oneshot::channel();
        let ctx = self.clone();
        tokio::spawn(async move {
            let outcome = ctx.run(permit, run_id, inputs, params.into_inner(), token).await;
            let _ = tx.send(outcome);
        });

        Ok(RunHandle { run_id, done: rx })
    }

    async fn run(
        &self,
        permit: AdmissionPermit,
        run_id: Uuid,
        inputs: GenerationInputs,
        params: GenerationParameters,
        token: CancellationToken,
    ) -> Result<ModelArtifact> {
        let started = Instant::now();
        tracing::info!(
            %run_id,
            views = inputs.images.len(),
            apply_texture = params.apply_texture,
            format = params.output_format.extension(),
            "Generation admitted"
        );

        let result = match self.files.prepare(run_id).await {
            Ok(mut files) => {
                let outcome = AssertUnwindSafe(self.execute(&mut files, &inputs, &params, &token))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(GenError::Unrecoverable("pipeline panicked".into())));
                let result = settle(outcome, self.residency.restore().await);
                self.remove_files(&files, result.is_ok()).await;
                result
            }
            Err(e) => settle(Err(e.into()), self.residency.restore().await),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(artifact) => {
                tracing::info!(%run_id, elapsed_ms, size_bytes = artifact.size_bytes, "Generation complete");
                self.state.complete(artifact.clone());
            }
            Err(GenError::Cancelled) => {
                tracing::info!(%run_id, elapsed_ms, "Generation cancelled");
                self.state.cancelled();
            }
            Err(e) => {
                tracing::error!(%run_id, elapsed_ms, kind = e.kind().as_str(), error = %e, "Generation failed");
                self.state.fail(e.to_string());
            }
        }

        permit.release();
        result
    }

    async fn execute(
        &self,
        files: &mut RunFiles,
        inputs: &GenerationInputs,
        params: &GenerationParameters,
        token: &CancellationToken,
    ) -> Result<ModelArtifact> {
        let request = self.stage_inputs(files, inputs, params).await?;
        let latents = self.stage_shape(&request, token).await?;
        let mut mesh = self.stage_extract(&latents, params, token).await?;
        if params.apply_texture {
            mesh = self.stage_texture(mesh, &request, params, token).await?;
        }
        self.stage_export(files, &mesh, params, token).await
    }

    async fn stage_inputs(
        &self,
        files: &RunFiles,
        inputs: &GenerationInputs,
        params: &GenerationParameters,
    ) -> Result<ShapeRequest> {
        let mut views = Vec::with_capacity(inputs.images.len());
        for image in &inputs.images {
            let path = files.write_temp(&format!("input_{}.png", image.view.id()), &image.png).await?;
            views.push((image.view, path));
        }
        tracing::debug!(stage = PipelineStage::Validated.as_str(), views = views.len(), "Inputs staged");

        Ok(ShapeRequest {
            views,
            seed: params.seed,
            guidance_scale: params.guidance_scale,
            inference_steps: params.inference_steps,
        })
    }

    async fn stage_shape(&self, request: &ShapeRequest, token: &CancellationToken) -> Result<Latents> {
        checkpoint(token)?;
        if self.residency.is_displaced() {
            tracing::warn!("Models are away from their startup placement, restoring before shape generation");
            self.residency.restore().await?;
        }
        self.state.update(10, "Generating 3D shape...");

        let latents = timed(PipelineStage::ShapeGenerated, self.service.generate_shape(request)).await?;
        Ok(latents)
    }

    async fn stage_extract(
        &self,
        latents: &Latents,
        params: &GenerationParameters,
        token: &CancellationToken,
    ) -> Result<Mesh> {
        checkpoint(token)?;
        self.state.update(50, "Extracting mesh...");
        let mesh = timed(PipelineStage::MeshExtracted, self.decoder.decode(latents, params)).await?;

        self.state.update(70, "Post-processing mesh...");
        let raw_faces = mesh.faces;
        let mesh = self.service.post_process_mesh(&mesh, params.mesh_simplify_ratio).await?;
        tracing::info!(
            raw_faces,
            faces = mesh.faces,
            simplify_ratio = params.mesh_simplify_ratio,
            "Mesh post-processed"
        );
        Ok(mesh)
    }

    /// Texturing failures are not fatal: the untextured mesh goes on to
    /// export. Residency failures around it are.
    async fn stage_texture(
        &self,
        mesh: Mesh,
        request: &ShapeRequest,
        params: &GenerationParameters,
        token: &CancellationToken,
    ) -> Result<Mesh> {
        checkpoint(token)?;
        self.state.update(75, "Offloading shape model...");
        self.residency.release_from(ModelName::Shape, Device::Gpu).await?;
        self.residency.ensure_resident(ModelName::Texture, Device::Gpu).await?;

        self.state.update(80, "Applying texture...");
        let Some(image) = request.front() else {
            tracing::warn!("No front view to texture from, continuing with untextured mesh");
            return Ok(mesh);
        };

        match timed(
            PipelineStage::Textured,
            self.service.apply_texture(&mesh, image, params.texture_size),
        )
        .await
        {
            Ok(textured) => Ok(textured),
            Err(e) => {
                let err = GenError::TextureStage(e.to_string());
                tracing::warn!(kind = err.kind().as_str(), error = %err, "Continuing with untextured mesh");
                Ok(mesh)
            }
        }
    }

    async fn stage_export(
        &self,
        files: &mut RunFiles,
        mesh: &Mesh,
        params: &GenerationParameters,
        token: &CancellationToken,
    ) -> Result<ModelArtifact> {
        checkpoint(token)?;
        self.state.set_message("Exporting model...");

        let bytes = timed(PipelineStage::Exported, self.service.export(mesh, params.output_format)).await?;
        if bytes.is_empty() {
            return Err(GenError::Unrecoverable("model service returned an empty export".into()));
        }
        Ok(files.save_model(&bytes, params.output_format).await?)
    }

    async fn remove_files(&self, files: &RunFiles, success: bool) {
        if let Err(e) = files.cleanup(success).await {
            tracing::warn!(dir = %files.dir().display(), error = %e, "Failed to clean up run files");
        }
    }
}

/// Folds the residency restore into the run's outcome. A failed restore fails
/// an otherwise successful run; an earlier error is kept.
fn settle(outcome: Result<ModelArtifact>, restored: Result<()>) -> Result<ModelArtifact> {
    match (outcome, restored) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Err(restore)) => {
            tracing::error!(error = %restore, "Failed to restore model residency");
            Err(e)
        }
    }
}

fn check_inputs(inputs: &GenerationInputs) -> Result<()> {
    if !inputs.images.iter().any(|image| image.view == View::Front) {
        return Err(GenError::Validation("a front view image is required".into()));
    }
    for view in View::all() {
        if inputs.images.iter().filter(|image| image.view == view).count() > 1 {
            return Err(GenError::Validation(format!("duplicate {} view", view.id())));
        }
    }
    if inputs.images.iter().any(|image| image.png.is_empty()) {
        return Err(GenError::Validation("empty image".into()));
    }
    Ok(())
}

async fn timed<T, E, F>(stage: PipelineStage, fut: F) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    let started = Instant::now();
    let result = fut.await;
    tracing::info!(
        stage = stage.as_str(),
        ok = result.is_ok(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Stage finished"
    );
    result
}
