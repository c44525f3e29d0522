// Crypt endpoints: /encrypt, /decrypt

use axum::{extract::State, http::StatusCode, Json};

use crate::encryption::CryptMode;
use crate::error::TransferError;
use crate::server::error::{ApiResponse, ApiResult};
use crate::server::params::FormParams;
use crate::server::AppState;
use crate::status::CryptStatus;

type Accepted = (StatusCode, Json<ApiResponse<CryptStatus>>);

/// POST /encrypt
pub async fn encrypt_file(State(state): State<AppState>, params: FormParams) -> ApiResult<Accepted> {
    start(&state, &params, CryptMode::Encrypt).await
}

/// POST /decrypt
pub async fn decrypt_file(State(state): State<AppState>, params: FormParams) -> ApiResult<Accepted> {
    start(&state, &params, CryptMode::Decrypt).await
}

async fn start(state: &AppState, params: &FormParams, mode: CryptMode) -> ApiResult<Accepted> {
    let name = params.required("file")?;
    let crypt = state
        .crypt
        .as_ref()
        .ok_or_else(|| TransferError::Unavailable("no encryption key configured".to_string()))?;

    let job = crypt.start(name, mode).await?;
    let message = match mode {
        CryptMode::Encrypt => "encryption started",
        CryptMode::Decrypt => "decryption started",
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(message, CryptStatus::from(job.as_ref()))),
    ))
}
