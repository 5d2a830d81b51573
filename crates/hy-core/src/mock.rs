//! Deterministic in-process [`ModelService`] for tests and local runs.
//!
//! Failures are scripted up front (`with_*` / `fail_*` builders) and every
//! call is recorded so tests can assert on exact call sequences.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use crate::budget::GIB;
use crate::error::ServiceError;
use crate::params::OutputFormat;
use crate::planner::ExtractionPlan;
use crate::service::{Device, Latents, Mesh, ModelName, ModelService, ShapeRequest};
use crate::status::StateMachine;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GenerateShape { views: usize },
    DecodeMesh(ExtractionPlan),
    PostProcess { simplify_ratio: f32 },
    ApplyTexture { texture_size: u32 },
    Export(OutputFormat),
    MoveModel(ModelName, Device),
    MoveLatents(Device),
}

/// Model calls a [`CallGate`] can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedCall {
    Shape,
    Decode,
    Texture,
}

/// Holds one kind of model call until released, so a run can be kept in
/// flight at a known stage.
#[derive(Debug, Clone)]
pub struct CallGate {
    entered: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl CallGate {
    fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        }
    }

    /// Resolves once a run has reached the gated call.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.release.add_permits(1);
    }

    async fn pass(&self) -> Result<(), ServiceError> {
        self.entered.notify_one();
        let permit = self
            .release
            .acquire()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;
        permit.forget();
        Ok(())
    }
}

pub struct ScriptedModelService {
    total_bytes: u64,
    free_bytes: u64,
    decode_ooms: AtomicUsize,
    shape_error: Option<ServiceError>,
    texture_error: Option<ServiceError>,
    export_error: Option<ServiceError>,
    move_error: Option<ServiceError>,
    move_error_once: Mutex<Option<(ModelName, Device, ServiceError)>>,
    gate: Option<(GatedCall, CallGate)>,
    observer: Mutex<Option<Arc<StateMachine>>>,
    placement: Mutex<BTreeMap<ModelName, Device>>,
    residency_at_texture: Mutex<Option<BTreeMap<ModelName, Device>>>,
    shared_gpu_seen: AtomicBool,
    progress_seen: Mutex<Vec<u8>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
}

impl Default for ScriptedModelService {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ScriptedModelService {
    pub fn new() -> Self {
        let placement = BTreeMap::from([(ModelName::Shape, Device::Gpu), (ModelName::Texture, Device::Cpu)]);
        Self {
            total_bytes: 24 * GIB,
            free_bytes: 16 * GIB,
            decode_ooms: AtomicUsize::new(0),
            shape_error: None,
            texture_error: None,
            export_error: None,
            move_error: None,
            move_error_once: Mutex::new(None),
            gate: None,
            observer: Mutex::new(None),
            placement: Mutex::new(placement),
            residency_at_texture: Mutex::new(None),
            shared_gpu_seen: AtomicBool::new(false),
            progress_seen: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_memory(mut self, total_bytes: u64, free_bytes: u64) -> Self {
        self.total_bytes = total_bytes;
        self.free_bytes = free_bytes;
        self
    }

    /// The first `count` decode calls run out of memory.
    pub fn with_decode_ooms(self, count: usize) -> Self {
        self.decode_ooms.store(count, Ordering::SeqCst);
        self
    }

    pub fn fail_shape_with(mut self, err: ServiceError) -> Self {
        self.shape_error = Some(err);
        self
    }

    pub fn fail_texture_with(mut self, err: ServiceError) -> Self {
        self.texture_error = Some(err);
        self
    }

    pub fn fail_export_with(mut self, err: ServiceError) -> Self {
        self.export_error = Some(err);
        self
    }

    /// Every model move fails.
    pub fn fail_move_with(mut self, err: ServiceError) -> Self {
        self.move_error = Some(err);
        self
    }

    /// Only the next move of `name` onto `device` fails.
    pub fn fail_move_once(self, name: ModelName, device: Device, err: ServiceError) -> Self {
        *lock(&self.move_error_once) = Some((name, device, err));
        self
    }

    pub fn with_gate(mut self, call: GatedCall) -> (Self, CallGate) {
        let gate = CallGate::new();
        self.gate = Some((call, gate.clone()));
        (self, gate)
    }

    pub fn with_shape_gate(self) -> (Self, CallGate) {
        self.with_gate(GatedCall::Shape)
    }

    /// Records the run's progress each time the pipeline calls in.
    pub fn observe(&self, state: Arc<StateMachine>) {
        *lock(&self.observer) = Some(state);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn decode_plans(&self) -> Vec<ExtractionPlan> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::DecodeMesh(plan) => Some(plan),
                _ => None,
            })
            .collect()
    }

    pub fn placement(&self, name: ModelName) -> Option<Device> {
        lock(&self.placement).get(&name).copied()
    }

    pub fn residency_at_texture(&self) -> Option<BTreeMap<ModelName, Device>> {
        lock(&self.residency_at_texture).clone()
    }

    /// Whether shape and texture were ever on the GPU together.
    pub fn saw_shared_gpu(&self) -> bool {
        self.shared_gpu_seen.load(Ordering::SeqCst)
    }

    pub fn progress_seen(&self) -> Vec<u8> {
        lock(&self.progress_seen).clone()
    }

    fn record(&self, call: Call) {
        if let Some(state) = lock(&self.observer).as_ref() {
            lock(&self.progress_seen).push(state.snapshot().progress);
        }
        lock(&self.calls).push(call);
    }

    async fn pass_gate(&self, call: GatedCall) -> Result<(), ServiceError> {
        match &self.gate {
            Some((gated, gate)) if *gated == call => gate.pass().await,
            _ => Ok(()),
        }
    }

    fn take_move_error(&self, name: ModelName, device: Device) -> Option<ServiceError> {
        let mut once = lock(&self.move_error_once);
        match once.take() {
            Some((n, d, err)) if n == name && d == device => Some(err),
            other => {
                *once = other;
                None
            }
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ModelService for ScriptedModelService {
    async fn generate_shape(&self, request: &ShapeRequest) -> Result<Latents, ServiceError> {
        self.record(Call::GenerateShape { views: request.views.len() });

        self.pass_gate(GatedCall::Shape).await?;

        if let Some(err) = &self.shape_error {
            return Err(err.clone());
        }
        if request.front().is_none() {
            return Err(ServiceError::InvalidInput("front view is required".into()));
        }

        Ok(Latents { id: self.next_id("latents"), device: Device::Gpu })
    }

    async fn decode_mesh(&self, latents: &Latents, plan: ExtractionPlan) -> Result<Mesh, ServiceError> {
        self.record(Call::DecodeMesh(plan));
        self.pass_gate(GatedCall::Decode).await?;

        let remaining = self.decode_ooms.load(Ordering::SeqCst);
        if remaining > 0 {
            self.decode_ooms.store(remaining - 1, Ordering::SeqCst);
            return Err(ServiceError::ResourceExhausted {
                detail: format!("decoding {} at resolution {}", latents.id, plan.octree_resolution),
            });
        }

        let faces = u64::from(plan.octree_resolution) * u64::from(plan.octree_resolution) * 2;
        Ok(Mesh {
            id: self.next_id("mesh"),
            vertices: faces / 2 + 2,
            faces,
            textured: false,
        })
    }

    async fn post_process_mesh(&self, mesh: &Mesh, simplify_ratio: f32) -> Result<Mesh, ServiceError> {
        self.record(Call::PostProcess { simplify_ratio });

        let faces = ((mesh.faces as f64 * f64::from(simplify_ratio)).ceil() as u64).max(1);
        Ok(Mesh {
            id: self.next_id("mesh"),
            vertices: faces / 2 + 2,
            faces,
            textured: mesh.textured,
        })
    }

    async fn apply_texture(&self, mesh: &Mesh, _image: &Path, texture_size: u32) -> Result<Mesh, ServiceError> {
        self.record(Call::ApplyTexture { texture_size });
        *lock(&self.residency_at_texture) = Some(lock(&self.placement).clone());
        self.pass_gate(GatedCall::Texture).await?;

        if let Some(err) = &self.texture_error {
            return Err(err.clone());
        }
        Ok(Mesh {
            id: self.next_id("mesh"),
            textured: true,
            ..mesh.clone()
        })
    }

    async fn export(&self, mesh: &Mesh, format: OutputFormat) -> Result<Vec<u8>, ServiceError> {
        self.record(Call::Export(format));

        if let Some(err) = &self.export_error {
            return Err(err.clone());
        }

        let body = match format {
            OutputFormat::Glb => format!("glTF:{}:{}", mesh.id, mesh.faces),
            OutputFormat::Obj => format!("o {}\n# faces {}\n", mesh.id, mesh.faces),
        };
        Ok(body.into_bytes())
    }

    async fn free_memory_bytes(&self, _device: Device) -> Result<u64, ServiceError> {
        Ok(self.free_bytes)
    }

    async fn total_memory_bytes(&self, _device: Device) -> Result<u64, ServiceError> {
        Ok(self.total_bytes)
    }

    async fn move_model(&self, name: ModelName, device: Device) -> Result<(), ServiceError> {
        self.record(Call::MoveModel(name, device));

        if let Some(err) = &self.move_error {
            return Err(err.clone());
        }
        if let Some(err) = self.take_move_error(name, device) {
            return Err(err);
        }
        let mut placement = lock(&self.placement);
        placement.insert(name, device);
        if placement.values().all(|d| *d == Device::Gpu) {
            self.shared_gpu_seen.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn move_latents(&self, latents: &Latents, device: Device) -> Result<Latents, ServiceError> {
        self.record(Call::MoveLatents(device));
        Ok(Latents { id: latents.id.clone(), device })
    }
}
