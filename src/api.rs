use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { data })).into_response()
}

pub fn bad_request(msg: &str) -> Response {
    error(StatusCode::BAD_REQUEST, msg)
}

pub fn error(status: StatusCode, msg: &str) -> Response {
    error_response(status, msg.to_string(), None)
}

pub fn internal_error(msg: &str) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, msg.to_string(), None)
}

/// Maps a failed sync onto the response a caller can act on.
pub fn sync_error(err: &SyncError) -> Response {
    let status = match err {
        SyncError::Auth(_) => StatusCode::UNAUTHORIZED,
        SyncError::Busy => StatusCode::CONFLICT,
        SyncError::ConfigFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SyncError::Transport(_) | SyncError::Parse(_) => StatusCode::BAD_GATEWAY,
        SyncError::CreateEntry { .. } | SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, crate::unpack_error(err), Some(err.kind()))
}

fn error_response(status: StatusCode, error: String, kind: Option<&'static str>) -> Response {
    (status, Json(ErrorResponse { error, kind })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_errors_map_to_statuses() {
        assert_eq!(
            sync_error(&SyncError::missing_token()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(sync_error(&SyncError::Busy).status(), StatusCode::CONFLICT);
        assert_eq!(
            sync_error(&SyncError::ConfigFormat("bad".into())).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            sync_error(&SyncError::Store(anyhow::anyhow!("disk"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
