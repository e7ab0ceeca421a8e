use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    fn build(code: StatusCode, status: &str, success: bool, msg: &str) -> impl IntoResponse {
        (
            code,
            Json(JsonResponse {
                status: status.to_string(),
                success,
                message: msg.to_string(),
            }),
        )
    }

    pub fn success(msg: &str) -> impl IntoResponse {
        Self::build(StatusCode::OK, "success", true, msg)
    }

    pub fn bad_request(msg: &str) -> impl IntoResponse {
        Self::build(StatusCode::BAD_REQUEST, "error", false, msg)
    }

    pub fn unauthorized(msg: &str) -> impl IntoResponse {
        Self::build(StatusCode::UNAUTHORIZED, "error", false, msg)
    }

    pub fn not_found(msg: &str) -> impl IntoResponse {
        Self::build(StatusCode::NOT_FOUND, "error", false, msg)
    }

    pub fn server_error(msg: &str) -> impl IntoResponse {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "error", false, msg)
    }

    pub fn too_many_requests(msg: &str) -> impl IntoResponse {
        Self::build(StatusCode::TOO_MANY_REQUESTS, "error", false, msg)
    }
}

/// Flash category carried back to the frontend as a query parameter.
#[derive(Clone, Copy, Debug)]
pub enum Flash {
    Success,
    Info,
    Warning,
    Error,
}

impl Flash {
    fn param(&self) -> &'static str {
        match self {
            Flash::Success => "success",
            Flash::Info => "info",
            Flash::Warning => "warning",
            Flash::Error => "error",
        }
    }
}

/// Browser-facing redirect with a flashed message, e.g.
/// `{origin}/plans?error=Payment%20system%20error`.
pub fn redirect_with_flash(origin: &str, path: &str, flash: Flash, msg: &str) -> Redirect {
    let url = format!(
        "{origin}{path}?{}={}",
        flash.param(),
        urlencoding::encode(msg)
    );
    Redirect::to(&url)
}
