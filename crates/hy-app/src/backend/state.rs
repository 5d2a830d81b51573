use std::sync::Arc;
use hy_core::OrchestratorContext;

pub struct AppState {
    pub ctx: Arc<OrchestratorContext>,
}

impl AppState {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }
}
