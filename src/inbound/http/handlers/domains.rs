use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};

use crate::domain::provisioning::models::records::{
    CreateDomainRequest, DnsRecordSet, DomainRecord, RotateDkimRequest,
};
use crate::domain::provisioning::ports::ProvisioningService;
use crate::inbound::http::auth::require_api_key;
use crate::inbound::http::errors::AppError;
use crate::inbound::http::state::SharedProvisioningState;
use crate::outbound::cache::ReadCache;

/// What callers see of a domain row. The private key never leaves the
/// database through this API.
#[derive(serde::Serialize)]
pub struct DomainResponse {
    pub name: String,
    pub dkim_selector: String,
    pub dkim_public_key: String,
    pub spf_record: String,
    pub dmarc_record: String,
    pub server_ip: String,
    pub created_at: DateTime<Utc>,
}

impl From<&DomainRecord> for DomainResponse {
    fn from(record: &DomainRecord) -> Self {
        Self {
            name: record.name.clone(),
            dkim_selector: record.dkim_selector.clone(),
            dkim_public_key: record.dkim_public_key.clone(),
            spf_record: record.spf_record.clone(),
            dmarc_record: record.dmarc_record.clone(),
            server_ip: record.server_ip.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(serde::Serialize)]
struct ProvisionedDomainResponse {
    domain: DomainResponse,
    dns_records: DnsRecordSet,
}

#[derive(serde::Serialize)]
struct RotatedDkimResponse {
    domain: DomainResponse,
    old_selector: String,
    dns_records: DnsRecordSet,
}

pub async fn create_domain<PS: ProvisioningService>(
    request: HttpRequest,
    body: web::Json<CreateDomainRequest>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let provisioned = state.service().create_domain(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(ProvisionedDomainResponse {
        domain: DomainResponse::from(&provisioned.record),
        dns_records: provisioned.dns,
    }))
}

pub async fn list_domains<PS: ProvisioningService>(
    request: HttpRequest,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let key = ReadCache::collection_key("domains");
    if let Some(hit) = state.cache().get(&key).await {
        return Ok(HttpResponse::Ok().json(hit));
    }
    let domains = state.service().list_domains().await?;
    let body = serde_json::json!({
        "domains": domains.iter().map(DomainResponse::from).collect::<Vec<_>>(),
    });
    state.cache().put(key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}

pub async fn get_domain<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let name = path.into_inner();
    let key = ReadCache::item_key("domains", &name);
    if let Some(hit) = state.cache().get(&key).await {
        return Ok(HttpResponse::Ok().json(hit));
    }
    let record = state.service().get_domain(&name).await?;
    let body = serde_json::to_value(DomainResponse::from(&record))
        .map_err(|e| AppError::Unexpected(e.into()))?;
    state.cache().put(key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}

pub async fn delete_domain<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    state.service().delete_domain(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn dns_records<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let name = path.into_inner();
    let key = ReadCache::item_key("domains", &format!("{}/dns_records", name));
    if let Some(hit) = state.cache().get(&key).await {
        return Ok(HttpResponse::Ok().json(hit));
    }
    let records = state.service().dns_records(&name).await?;
    let body =
        serde_json::to_value(records).map_err(|e| AppError::Unexpected(e.into()))?;
    state.cache().put(key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}

pub async fn rotate_dkim<PS: ProvisioningService>(
    request: HttpRequest,
    path: web::Path<String>,
    body: web::Json<RotateDkimRequest>,
    state: web::Data<SharedProvisioningState<PS>>,
) -> Result<HttpResponse, AppError> {
    require_api_key(&request, &state).await?;
    let rotated = state
        .service()
        .rotate_dkim(&path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(RotatedDkimResponse {
        domain: DomainResponse::from(&rotated.record),
        old_selector: rotated.old_selector,
        dns_records: rotated.dns,
    }))
}
