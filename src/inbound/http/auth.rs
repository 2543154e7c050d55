use actix_web::HttpRequest;
use secrecy::ExposeSecret;

use crate::domain::provisioning::ports::ProvisioningService;
use crate::inbound::http::errors::AppError;
use crate::inbound::http::state::SharedProvisioningState;

const API_KEY_HEADER: &str = "X-Api-Key";

/// Every route except the health check calls this first. The presented
/// key must match either the statically configured bootstrap key or a
/// row in `api_keys`; a database hit bumps the key's `last_used_at`.
#[tracing::instrument(name = "Checking API key", skip_all)]
pub async fn require_api_key<PS: ProvisioningService>(
    request: &HttpRequest,
    state: &SharedProvisioningState<PS>,
) -> Result<(), AppError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    if presented == state.api_key().expose_secret() {
        return Ok(());
    }
    if state.service().verify_api_key(presented).await? {
        return Ok(());
    }
    Err(AppError::Unauthorized)
}
