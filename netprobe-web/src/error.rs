//! API 错误响应

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::Utc;
use netprobe_toolbox::ToolboxError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Toolbox(#[from] ToolboxError),

    #[error("Required parameter '{0}' is missing or blank")]
    MissingParameter(&'static str),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    timestamp: chrono::DateTime<Utc>,
    status: u16,
    error: &'a str,
    message: String,
}

impl ApiError {
    const fn title(&self) -> &'static str {
        match self {
            Self::Toolbox(ToolboxError::Rejected(_)) => "Security Error",
            Self::Toolbox(ToolboxError::ConfigError(_)) => "Internal Server Error",
            Self::MissingParameter(_) => "Invalid Parameter",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Toolbox(ToolboxError::Rejected(_)) => StatusCode::FORBIDDEN,
            Self::Toolbox(ToolboxError::ConfigError(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = match self {
            Self::Toolbox(e) if !e.is_expected() => {
                tracing::error!("Unexpected error: {e}");
                "An unexpected error occurred. Please try again later.".to_string()
            }
            other => {
                tracing::warn!("{}: {other}", self.title());
                other.to_string()
            }
        };
        HttpResponse::build(status).json(ErrorBody {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error: self.title(),
            message,
        })
    }
}
