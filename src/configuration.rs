use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::path::PathBuf;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub provisioning: ProvisioningSettings,
    pub cache: CacheSettings,
    pub ip_lookup: IpLookupSettings,
    pub general: GeneralSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct GeneralSettings {
    pub log_level: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub api_key: Secret<String>,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
}

/// Settings for the provisioning side effects: where key material and
/// mailbox storage live, which accounts own them, and how patient the
/// signing-table lock is.
#[derive(serde::Deserialize, Clone)]
pub struct ProvisioningSettings {
    /// Mail server hostname advertised in MX/SPF records.
    pub hostname: String,
    pub dkim_keys_dir: PathBuf,
    pub vmail_dir: PathBuf,
    pub key_table_path: PathBuf,
    pub signing_table_path: PathBuf,
    /// Owner handed the private keys, e.g. "opendkim:opendkim".
    pub signing_owner: String,
    /// Owner handed the maildir trees, e.g. "vmail:vmail".
    pub storage_owner: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub lock_max_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub lock_base_delay_ms: u64,
    pub password_policy: PasswordPolicySettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct PasswordPolicySettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub min_length: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub min_character_classes: usize,
}

#[derive(serde::Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub capacity: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub ttl_seconds: u64,
}

#[derive(serde::Deserialize, Clone)]
pub struct IpLookupSettings {
    pub base_url: String,
    /// Used when the lookup service cannot be reached.
    pub fallback_ip: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl DatabaseSettings {
    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn with_db(&self) -> PgConnectOptions {
        self.without_db().database(&self.database_name)
    }
}

impl IpLookupSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_milliseconds)
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT.");

    let mut settings = config::Config::default();
    settings.merge(config::File::from(configuration_directory.join("base")).required(true))?;
    settings.merge(
        config::File::from(configuration_directory.join(environment.as_str())).required(true),
    )?;
    // e.g. `APP_APPLICATION__PORT=5001` sets `Settings.application.port`
    settings.merge(config::Environment::with_prefix("app").separator("__"))?;

    settings.try_into()
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}
