use std::sync::Arc;
use axum::Json;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use crate::backend::form::{FormMode, GenerationForm};
use crate::backend::routes::MODEL_URL;
use crate::backend::schemas::{AcceptedResponse, GenerateQuery, GenerateResponse};
use crate::backend::state::AppState;
use crate::error::AppError;

pub async fn generate_no_preview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GenerateQuery>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    generate(state, query, multipart, FormMode::Single).await
}

pub async fn generate_multi_no_preview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GenerateQuery>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    generate(state, query, multipart, FormMode::MultiView).await
}

async fn generate(
    state: Arc<AppState>,
    query: GenerateQuery,
    multipart: Multipart,
    mode: FormMode,
) -> Result<Response, AppError> {
    let form = GenerationForm::parse(multipart, mode).await?;
    let params = form.params.validate()?;
    let handle = state.ctx.submit(form.inputs, params)?;
    let run_id = handle.run_id();

    if !query.wait {
        tracing::info!(%run_id, "Generation accepted");
        let body = AcceptedResponse {
            status: "PROCESSING".to_string(),
            run_id,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let artifact = handle.wait().await?;
    tracing::info!(%run_id, size_bytes = artifact.size_bytes, "Generation finished");

    Ok(Json(GenerateResponse {
        status: "COMPLETE".to_string(),
        model_url: MODEL_URL.to_string(),
    })
    .into_response())
}
