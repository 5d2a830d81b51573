use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hy_core::{ErrorKind, GenError};
use thiserror::Error;
use crate::backend::schemas::{ErrorBody, ErrorDetail};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Generation(#[from] GenError),

    #[error("Invalid form data: {0}")]
    Form(String),

    #[error("No model has been generated yet")]
    NoModel,
}

/// nginx's "client closed request", used for runs cancelled by the user.
fn cancelled_status() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Form(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NoModel => StatusCode::NOT_FOUND,
            Self::Generation(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Busy => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Cancelled => cancelled_status(),
                ErrorKind::Resource | ErrorKind::TextureStage | ErrorKind::Unrecoverable => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Form(_) => ErrorKind::Validation.as_str(),
            Self::NoModel => "not_found",
            Self::Generation(err) => err.kind().as_str(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && !matches!(self, Self::Generation(GenError::Busy)) {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_per_category() {
        assert_eq!(AppError::from(GenError::Busy).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::from(GenError::Cancelled).status().as_u16(), 499);
        assert_eq!(
            AppError::from(GenError::Validation("bad".into())).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(GenError::Unrecoverable("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::from(GenError::Resource("no room".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::NoModel.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(AppError::from(GenError::Busy).kind(), "busy");
        assert_eq!(AppError::Form("seed".into()).kind(), "validation");
    }
}
