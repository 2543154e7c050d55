use crate::domain::provisioning::ports::ProvisioningService;
use crate::outbound::cache::ReadCache;
use secrecy::Secret;
use std::sync::Arc;

pub struct ProvisioningState<PS: ProvisioningService> {
    service: PS,
    cache: ReadCache,
    api_key: Secret<String>,
}

/// Cheaply cloneable handle shared by every worker.
pub struct SharedProvisioningState<PS: ProvisioningService>(Arc<ProvisioningState<PS>>);

impl<PS: ProvisioningService> Clone for SharedProvisioningState<PS> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<PS: ProvisioningService> SharedProvisioningState<PS> {
    pub fn new(service: PS, cache: ReadCache, api_key: Secret<String>) -> Self {
        Self(Arc::new(ProvisioningState {
            service,
            cache,
            api_key,
        }))
    }

    pub fn service(&self) -> &PS {
        &self.0.service
    }

    pub fn cache(&self) -> &ReadCache {
        &self.0.cache
    }

    pub fn api_key(&self) -> &Secret<String> {
        &self.0.api_key
    }
}
