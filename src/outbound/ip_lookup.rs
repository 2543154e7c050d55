use crate::configuration::IpLookupSettings;

/// Discovers the server's public IPv4 address for SPF record text.
///
/// The lookup service is a plain "returns your IP as text" endpoint; when
/// it cannot be reached the configured fallback address is used instead,
/// since a provisioning run must not fail on a DNS cosmetic.
#[derive(Debug, Clone)]
pub struct IpLookupClient {
    http_client: reqwest::Client,
    base_url: String,
    fallback_ip: String,
}

impl IpLookupClient {
    pub fn new(settings: IpLookupSettings) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .expect("Failed to build the IP lookup HTTP client");
        Self {
            http_client,
            base_url: settings.base_url,
            fallback_ip: settings.fallback_ip,
        }
    }

    #[tracing::instrument(name = "Looking up public IP", skip(self))]
    pub async fn public_ip(&self) -> String {
        match self.fetch().await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(error = %e, fallback = %self.fallback_ip, "public IP lookup failed");
                self.fallback_ip.clone()
            }
        }
    }

    async fn fetch(&self) -> Result<String, anyhow::Error> {
        let response = self
            .http_client
            .get(&self.base_url)
            .send()
            .await?
            .error_for_status()?;
        let ip = response.text().await?.trim().to_string();
        if ip.is_empty() || !ip.chars().all(|c| c.is_ascii_digit() || c == '.') {
            anyhow::bail!("lookup service returned an unusable address: {ip:?}");
        }
        Ok(ip)
    }
}
