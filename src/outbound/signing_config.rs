use crate::domain::provisioning::errors::ProvisioningError;
use crate::domain::provisioning::models::{domain_name::DomainName, selector::DkimSelector};
use crate::domain::provisioning::ports::SystemCommands;
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum SigningConfigError {
    #[error("Timed out acquiring the lock on {0}")]
    LockTimeout(PathBuf),
    #[error("Failed to update {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<SigningConfigError> for ProvisioningError {
    fn from(error: SigningConfigError) -> Self {
        match error {
            SigningConfigError::LockTimeout(_) => ProvisioningError::LockTimeout,
            SigningConfigError::Io { .. } => ProvisioningError::ExternalTool(error.to_string()),
            SigningConfigError::Unexpected(e) => ProvisioningError::Unexpected(e),
        }
    }
}

/// The two append-only tables the signing daemon reads: a key table
/// (selector → domain:selector:keypath) and a signing table (domain
/// wildcard → selector). Other processes append too, so every write takes
/// an exclusive advisory lock scoped to that single table file.
#[derive(Debug, Clone)]
pub struct SigningConfig<C>
where
    C: SystemCommands,
{
    key_table: PathBuf,
    signing_table: PathBuf,
    max_attempts: u32,
    base_delay: Duration,
    commands: Arc<C>,
}

impl<C> SigningConfig<C>
where
    C: SystemCommands,
{
    pub fn new(
        key_table: PathBuf,
        signing_table: PathBuf,
        max_attempts: u32,
        base_delay: Duration,
        commands: Arc<C>,
    ) -> Self {
        Self {
            key_table,
            signing_table,
            max_attempts,
            base_delay,
            commands,
        }
    }

    /// Appends this domain's signing association to both tables, then asks
    /// the daemon to reload. A failed reload is logged and deliberately
    /// does not fail provisioning: the daemon keeps signing under its prior
    /// configuration until a later reload succeeds.
    #[tracing::instrument(name = "Registering domain in signing tables", skip(self, key_path))]
    pub async fn register(
        &self,
        domain: &DomainName,
        selector: &DkimSelector,
        key_path: &Path,
    ) -> Result<(), SigningConfigError> {
        let key_line = format!(
            "{sel}._domainkey.{dom} {dom}:{sel}:{path}",
            sel = selector,
            dom = domain,
            path = key_path.display()
        );
        let signing_line = format!(
            "*@{dom} {sel}._domainkey.{dom}",
            sel = selector,
            dom = domain
        );

        self.append_line(&self.key_table, key_line).await?;
        self.append_line(&self.signing_table, signing_line).await?;

        if let Err(e) = self.commands.reload_signing_daemon().await {
            tracing::warn!(
                error = %e,
                "signing daemon reload failed; signing continues under the previous configuration"
            );
        }
        Ok(())
    }

    async fn append_line(&self, table: &Path, line: String) -> Result<(), SigningConfigError> {
        let table = table.to_path_buf();
        let max_attempts = self.max_attempts;
        let base_delay = self.base_delay;
        tokio::task::spawn_blocking(move || {
            append_with_lock(&table, &line, max_attempts, base_delay)
        })
        .await
        .map_err(|e| SigningConfigError::Unexpected(anyhow::Error::from(e)))?
    }
}

fn append_with_lock(
    table: &Path,
    line: &str,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<(), SigningConfigError> {
    let io_err = |source| SigningConfigError::Io {
        path: table.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(table)
        .map_err(io_err)?;

    let mut locked = false;
    for attempt in 0..max_attempts {
        match file.try_lock_exclusive() {
            Ok(()) => {
                locked = true;
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // Bounded exponential backoff before the next attempt.
                std::thread::sleep(base_delay * 2u32.saturating_pow(attempt));
            }
            Err(e) => return Err(io_err(e)),
        }
    }
    if !locked {
        return Err(SigningConfigError::LockTimeout(table.to_path_buf()));
    }

    let result = file
        .write_all(format!("{}\n", line).as_bytes())
        .and_then(|()| file.flush())
        .map_err(io_err);

    if let Err(e) = FileExt::unlock(&file) {
        tracing::warn!(path = %table.display(), error = %e, "failed to release table lock");
    }
    result
}
