// API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::TransferError;

/// Response envelope for command endpoints
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 0 on success, otherwise the HTTP status code
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            code: 0,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }
}

impl ApiResponse<()> {
    /// Success without a payload
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Transfer(err) => match err {
                TransferError::Parameter(_) => StatusCode::BAD_REQUEST,
                TransferError::NotFound(_) => StatusCode::NOT_FOUND,
                TransferError::AlreadyRunning(_) => StatusCode::CONFLICT,
                TransferError::Transport(_)
                | TransferError::UpstreamStatus(_)
                | TransferError::Extractor(_) => StatusCode::BAD_GATEWAY,
                TransferError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                TransferError::Filesystem { .. } | TransferError::Crypto(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self);
        } else {
            warn!("request rejected: {}", self);
        }

        let body = ApiResponse::<()>::error(status.as_u16() as i32, self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (TransferError::Parameter("x".into()).into(), StatusCode::BAD_REQUEST),
            (TransferError::NotFound("x".into()).into(), StatusCode::NOT_FOUND),
            (TransferError::AlreadyRunning("x".into()).into(), StatusCode::CONFLICT),
            (TransferError::Extractor("x".into()).into(), StatusCode::BAD_GATEWAY),
            (TransferError::UpstreamStatus("x".into()).into(), StatusCode::BAD_GATEWAY),
            (TransferError::Unavailable("x".into()).into(), StatusCode::SERVICE_UNAVAILABLE),
            (TransferError::Crypto("x".into()).into(), StatusCode::INTERNAL_SERVER_ERROR),
            (
                TransferError::io("rm", std::io::Error::from(std::io::ErrorKind::PermissionDenied))
                    .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{}", err);
        }
    }

    #[test]
    fn test_error_envelope() {
        let body = serde_json::to_value(ApiResponse::<()>::error(404, "gone".into())).unwrap();
        assert_eq!(body, serde_json::json!({"code": 404, "message": "gone"}));
    }
}
