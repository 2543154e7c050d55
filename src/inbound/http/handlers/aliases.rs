use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::provisioning::models::records::{AliasRecord, CreateAliasRequest};
use crate::domain::provisioning::ports::ProvisioningService;
use crate::inbound::http::auth::require_api_key;
use crate::inbound::http::errors::AppError;
use crate::inbound::http::state::SharedProvisioningState;
use crate::outbound::cache::ReadCache;

#[derive(serde::Deserialize)]
pub struct ListFilter {
    pub domain: Option<String>,
}

#[derive(serde::Serialize)]
pub struct AliasResponse {
    pub id: Uuid,
    pub source: String,
    pub destination: String,
    pub created_at: DateTime<Utc>,
}

impl From<&AliasRecord> for AliasResponse {
    fn from(record: &AliasRecord) -> Self {
        Self {
            id: record.id,
            source: record.source.clone(),
            destination: record.destination.clone(),
            created_at: record.created_at,
        }
    }
}

pub async fn create_alias<PS: ProvisioningService>(
    request: HttpRequest,
    body: web::Json<CreateAliasRequest>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let record = state.service().create_alias(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(AliasResponse::from(&record)))
}

pub async fn list_aliases<PS: ProvisioningService>(
    request: HttpRequest,
    filter: web::Query<ListFilter>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let key = match &filter.domain {
        Some(domain) => ReadCache::item_key("aliases", &format!("domain={}", domain)),
        None => ReadCache::collection_key("aliases"),
    };
    if let Some(hit) = state.cache().get(&key).await {
        return Ok(HttpResponse::Ok().json(hit));
    }
    let aliases = state
        .service()
        .list_aliases(filter.domain.as_deref())
        .await?;
    let body = serde_json::json!({
        "aliases": aliases.iter().map(AliasResponse::from).collect::<Vec<_>>(),
    });
    state.cache().put(key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}

pub async fn delete_alias<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    state.service().delete_alias(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
