use std::sync::Arc;
use axum::Json;
use axum::extract::State;
use hy_core::StatusReport;
use crate::backend::schemas::{InterruptResponse, PingResponse};
use crate::backend::state::AppState;

pub async fn ping(State(state): State<Arc<AppState>>) -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok".to_string(),
        busy: state.ctx.is_busy(),
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.ctx.get_status())
}

pub async fn interrupt(State(state): State<Arc<AppState>>) -> Json<InterruptResponse> {
    let interrupted = state.ctx.interrupt();
    let message = if interrupted {
        "Cancellation requested; the run stops at its next stage boundary"
    } else {
        "No generation is running"
    };

    Json(InterruptResponse {
        interrupted,
        message: message.to_string(),
    })
}
