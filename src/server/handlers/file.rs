// File endpoints: /delete, /rename

use axum::{extract::State, Json};
use tracing::info;

use crate::server::error::{ApiResponse, ApiResult};
use crate::server::params::FormParams;
use crate::server::AppState;

/// DELETE /delete
pub async fn delete_file(
    State(state): State<AppState>,
    params: FormParams,
) -> ApiResult<Json<ApiResponse<()>>> {
    let name = params.required("file")?;
    state.files.delete_file(name).await?;
    info!("DELETE /delete: {}", name);
    Ok(Json(ApiResponse::message(format!("{} deleted", name))))
}

/// POST /rename
///
/// Returns the final name, which keeps the old extension when the new name
/// has none.
pub async fn rename_file(
    State(state): State<AppState>,
    params: FormParams,
) -> ApiResult<Json<ApiResponse<String>>> {
    let old_name = params.required("old_name")?;
    let new_name = params.required("new_name")?;

    let renamed = state.files.rename_file(old_name, new_name).await?;
    info!("POST /rename: {} -> {}", old_name, renamed);
    Ok(Json(ApiResponse::success("file renamed", renamed)))
}
