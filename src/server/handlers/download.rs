// Transfer endpoints: /download, /yt-dlp, /pause, /resume, /cancel

use axum::{extract::State, http::StatusCode, Json};
use tracing::info;

use crate::downloader::{CancelOutcome, PauseOutcome, ResumeOutcome, StartOutcome};
use crate::server::error::{ApiError, ApiResponse, ApiResult};
use crate::server::params::FormParams;
use crate::server::AppState;
use crate::status::TransferStatus;

type Created = (StatusCode, Json<ApiResponse<TransferStatus>>);

fn started(outcome: StartOutcome, status: TransferStatus) -> Created {
    let message = match outcome {
        StartOutcome::Started => "download started",
        StartOutcome::Resumed => "download resumed",
    };
    (StatusCode::CREATED, Json(ApiResponse::success(message, status)))
}

/// POST /download
pub async fn start_download(State(state): State<AppState>, params: FormParams) -> ApiResult<Created> {
    let url = params.required("url")?;
    let file_name = params.get("file_name");

    let (task, outcome) = state.transfers.start_direct(url, file_name).await?;
    info!("POST /download: source={}, outcome={:?}", url, outcome);
    Ok(started(outcome, TransferStatus::from(&task.snapshot())))
}

/// POST /yt-dlp
pub async fn start_extracted(State(state): State<AppState>, params: FormParams) -> ApiResult<Created> {
    let url = params.required("url")?;

    let (task, outcome) = state.transfers.start_extracted(url).await?;
    info!("POST /yt-dlp: source={}, outcome={:?}", url, outcome);
    Ok(started(outcome, TransferStatus::from(&task.snapshot())))
}

/// PUT /pause
///
/// Anything but a delivered pause request is informational, not an error.
pub async fn pause_download(
    State(state): State<AppState>,
    params: FormParams,
) -> ApiResult<Json<ApiResponse<()>>> {
    let url = params.required("url")?;
    let message = match state.transfers.pause(url).await {
        PauseOutcome::Requested => "pause requested".to_string(),
        PauseOutcome::NotRunning(s) => format!("download is not running ({})", s),
        PauseOutcome::NotFound => "no such download".to_string(),
        PauseOutcome::Unsupported => "pause is not supported for extracted downloads".to_string(),
    };
    Ok(Json(ApiResponse::message(message)))
}

/// PUT /resume
pub async fn resume_download(
    State(state): State<AppState>,
    params: FormParams,
) -> ApiResult<Json<ApiResponse<()>>> {
    let url = params.required("url")?;
    let message = match state.transfers.resume(url).await {
        ResumeOutcome::Resumed => "download resumed".to_string(),
        ResumeOutcome::AlreadyRunning => "download is already running".to_string(),
        ResumeOutcome::NotResumable(s) => format!("download cannot be resumed ({})", s),
        ResumeOutcome::NotFound => "no such download".to_string(),
        ResumeOutcome::Unsupported => {
            "resume is not supported for extracted downloads".to_string()
        }
    };
    Ok(Json(ApiResponse::message(message)))
}

/// PUT /cancel
pub async fn cancel_download(
    State(state): State<AppState>,
    params: FormParams,
) -> ApiResult<Json<ApiResponse<()>>> {
    let url = params.required("url")?;
    match state.transfers.cancel(url).await? {
        CancelOutcome::Cancelled => {
            info!("PUT /cancel: source={}", url);
            Ok(Json(ApiResponse::message("download cancelled")))
        }
        CancelOutcome::NothingToCancel => Err(ApiError::BadRequest(format!(
            "nothing to cancel for {}",
            url
        ))),
    }
}
