use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::provisioning::models::records::{ApiKeyRecord, CreateApiKeyRequest};
use crate::domain::provisioning::ports::ProvisioningService;
use crate::inbound::http::auth::require_api_key;
use crate::inbound::http::errors::AppError;
use crate::inbound::http::state::SharedProvisioningState;

/// What listings show of a key. The secret itself only appears in the
/// creation response.
#[derive(serde::Serialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&ApiKeyRecord> for ApiKeyResponse {
    fn from(record: &ApiKeyRecord) -> Self {
        Self {
            id: record.id,
            description: record.description.clone(),
            created_at: record.created_at,
            last_used_at: record.last_used_at,
        }
    }
}

#[derive(serde::Serialize)]
struct CreatedApiKeyResponse {
    id: Uuid,
    key: String,
    description: String,
    created_at: DateTime<Utc>,
}

pub async fn create_api_key<PS: ProvisioningService>(
    request: HttpRequest,
    body: web::Json<CreateApiKeyRequest>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let record = state.service().create_api_key(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(CreatedApiKeyResponse {
        id: record.id,
        key: record.key,
        description: record.description,
        created_at: record.created_at,
    }))
}

pub async fn list_api_keys<PS: ProvisioningService>(
    request: HttpRequest,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let keys = state.service().list_api_keys().await?;
    let body = serde_json::json!({
        "api_keys": keys.iter().map(ApiKeyResponse::from).collect::<Vec<_>>(),
    });
    Ok(HttpResponse::Ok().json(body))
}

pub async fn delete_api_key<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    state.service().delete_api_key(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
