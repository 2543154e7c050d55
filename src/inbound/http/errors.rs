use crate::domain::provisioning::errors::{ConflictKind, ProvisioningError};

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

/// HTTP-facing rendition of the provisioning failure taxonomy. Every
/// variant maps to a stable status code and a structured JSON body;
/// internal diagnostics stay in the logs.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Validation error on {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{0}")]
    Conflict(ConflictKind),
    #[error("{0} not found")]
    NotFound(String),
    #[error("External tool failed: {0}")]
    ExternalTool(String),
    #[error("Timed out waiting for a provisioning lock")]
    LockTimeout,
    #[error("Missing or invalid API key")]
    Unauthorized,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<ProvisioningError> for AppError {
    fn from(error: ProvisioningError) -> Self {
        match error {
            ProvisioningError::Validation { field, reason } => {
                AppError::Validation { field, reason }
            }
            ProvisioningError::Conflict(kind) => AppError::Conflict(kind),
            ProvisioningError::NotFound(what) => AppError::NotFound(what),
            ProvisioningError::ExternalTool(reason) => AppError::ExternalTool(reason),
            ProvisioningError::LockTimeout => AppError::LockTimeout,
            ProvisioningError::Unexpected(e) => AppError::Unexpected(e),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalTool(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Validation { field, reason } => serde_json::json!({
                "error": reason,
                "field": field,
            }),
            AppError::Conflict(ConflictKind::DomainHasMailboxes {
                domain,
                mailbox_count,
            }) => serde_json::json!({
                "error": format!("Domain {} still has mailboxes", domain),
                "mailbox_count": mailbox_count,
            }),
            AppError::Conflict(kind) => serde_json::json!({ "error": kind.to_string() }),
            AppError::NotFound(what) => serde_json::json!({
                "error": format!("{} not found", what),
            }),
            // Command names and paths stay out of client-visible bodies.
            AppError::ExternalTool(_) => serde_json::json!({
                "error": "A provisioning tool failed; the operation was rolled back",
            }),
            AppError::LockTimeout => serde_json::json!({
                "error": "The service is busy; retry shortly",
            }),
            AppError::Unauthorized => serde_json::json!({
                "error": "Missing or invalid API key",
            }),
            AppError::Unexpected(_) => serde_json::json!({
                "error": "An unexpected error occurred",
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
