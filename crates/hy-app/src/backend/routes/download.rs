use std::sync::Arc;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use crate::backend::state::AppState;
use crate::error::AppError;

pub async fn download_model(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let (artifact, bytes) = state.ctx.read_artifact().await?.ok_or(AppError::NoModel)?;
    let disposition = format!("attachment; filename=\"model.{}\"", artifact.format.extension());

    Ok((
        [
            (header::CONTENT_TYPE, artifact.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
