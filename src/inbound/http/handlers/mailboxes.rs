use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::provisioning::models::records::{
    CreateMailboxRequest, MailboxRecord, UpdatePasswordRequest,
};
use crate::domain::provisioning::ports::ProvisioningService;
use crate::inbound::http::auth::require_api_key;
use crate::inbound::http::errors::AppError;
use crate::inbound::http::state::SharedProvisioningState;
use crate::outbound::cache::ReadCache;

#[derive(serde::Deserialize)]
pub struct ListFilter {
    pub domain: Option<String>,
}

/// The password hash stays server-side.
#[derive(serde::Serialize)]
pub struct MailboxResponse {
    pub id: Uuid,
    pub email: String,
    pub quota_mb: i32,
    pub created_at: DateTime<Utc>,
}

impl From<&MailboxRecord> for MailboxResponse {
    fn from(record: &MailboxRecord) -> Self {
        Self {
            id: record.id,
            email: record.email.clone(),
            quota_mb: record.quota_mb,
            created_at: record.created_at,
        }
    }
}

fn list_key(filter: &ListFilter) -> String {
    match &filter.domain {
        Some(domain) => ReadCache::item_key("mailboxes", &format!("domain={}", domain)),
        None => ReadCache::collection_key("mailboxes"),
    }
}

pub async fn create_mailbox<PS: ProvisioningService>(
    request: HttpRequest,
    body: web::Json<CreateMailboxRequest>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let record = state.service().create_mailbox(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(MailboxResponse::from(&record)))
}

pub async fn list_mailboxes<PS: ProvisioningService>(
    request: HttpRequest,
    filter: web::Query<ListFilter>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let key = list_key(&filter);
    if let Some(hit) = state.cache().get(&key).await {
        return Ok(HttpResponse::Ok().json(hit));
    }
    let mailboxes = state
        .service()
        .list_mailboxes(filter.domain.as_deref())
        .await?;
    let body = serde_json::json!({
        "mailboxes": mailboxes.iter().map(MailboxResponse::from).collect::<Vec<_>>(),
    });
    state.cache().put(key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}

pub async fn get_mailbox<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let email = path.into_inner();
    let key = ReadCache::item_key("mailboxes", &email);
    if let Some(hit) = state.cache().get(&key).await {
        return Ok(HttpResponse::Ok().json(hit));
    }
    let record = state.service().get_mailbox(&email).await?;
    let body = serde_json::to_value(MailboxResponse::from(&record))
        .map_err(|e| AppError::Unexpected(e.into()))?;
    state.cache().put(key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}

pub async fn delete_mailbox<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    state.service().delete_mailbox(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn update_password<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdatePasswordRequest>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    state
        .service()
        .update_mailbox_password(&path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Realized usage is measured on every call, never cached.
pub async fn quota<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let usage = state.service().quota_usage(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(usage))
}
