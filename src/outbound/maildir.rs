use crate::domain::provisioning::errors::ProvisioningError;
use crate::domain::provisioning::models::{domain_name::DomainName, local_part::LocalPart};
use crate::domain::provisioning::ports::{CommandError, SystemCommands};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum MaildirError {
    #[error("Resolved path escapes the mail storage root: {0}")]
    Escape(String),
    #[error("Filesystem operation on mail storage failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl From<MaildirError> for ProvisioningError {
    fn from(error: MaildirError) -> Self {
        match error {
            MaildirError::Escape(path) => ProvisioningError::Unexpected(anyhow::anyhow!(
                "confinement check rejected {path}"
            )),
            MaildirError::Io(e) => ProvisioningError::ExternalTool(e.to_string()),
            MaildirError::Command(e) => e.into(),
        }
    }
}

/// Joins `components` under `base` and rejects anything that could step
/// outside it. Every filesystem touch in this module and in the quota path
/// goes through here, even for inputs the validators already accepted.
pub(crate) fn confined_path(
    base: &Path,
    components: &[&str],
) -> Result<PathBuf, MaildirError> {
    let mut path = base.to_path_buf();
    for component in components {
        let suspect = component.is_empty()
            || *component == "."
            || component.contains("..")
            || component.contains('/')
            || component.contains('\\')
            || component.contains('\0');
        if suspect {
            return Err(MaildirError::Escape(component.to_string()));
        }
        path.push(component);
    }
    if !path.starts_with(base) {
        return Err(MaildirError::Escape(path.display().to_string()));
    }
    Ok(path)
}

/// Creates and destroys per-mailbox storage trees under a fixed base
/// directory.
#[derive(Debug, Clone)]
pub struct MaildirManager<C>
where
    C: SystemCommands,
{
    base: PathBuf,
    storage_owner: String,
    commands: Arc<C>,
}

impl<C> MaildirManager<C>
where
    C: SystemCommands,
{
    const SUBDIRS: [&'static str; 3] = ["cur", "new", "tmp"];

    pub fn new(base: PathBuf, storage_owner: String, commands: Arc<C>) -> Self {
        Self {
            base,
            storage_owner,
            commands,
        }
    }

    pub fn path_for(
        &self,
        domain: &DomainName,
        local: &LocalPart,
    ) -> Result<PathBuf, MaildirError> {
        confined_path(&self.base, &[domain.as_ref(), local.as_ref()])
    }

    /// Creates the maildir tree with owner-only permissions and hands it to
    /// the storage account.
    #[tracing::instrument(name = "Creating maildir", skip(self))]
    pub async fn create(
        &self,
        domain: &DomainName,
        local: &LocalPart,
    ) -> Result<PathBuf, MaildirError> {
        let root = self.path_for(domain, local)?;
        for subdir in Self::SUBDIRS {
            let dir = confined_path(&root, &[subdir])?;
            tokio::fs::create_dir_all(&dir).await?;
        }
        tokio::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o700)).await?;
        for subdir in Self::SUBDIRS {
            tokio::fs::set_permissions(root.join(subdir), std::fs::Permissions::from_mode(0o700))
                .await?;
        }
        self.commands
            .change_owner(&root, &self.storage_owner)
            .await?;
        Ok(root)
    }

    /// Recursively removes the tree. An already-missing directory is not an
    /// error, and other failures are logged and swallowed.
    #[tracing::instrument(name = "Removing maildir", skip(self))]
    pub async fn remove(&self, domain: &DomainName, local: &LocalPart) {
        let root = match self.path_for(domain, local) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(error = %e, "refusing to remove unconfined maildir path");
                return;
            }
        };
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %root.display(), error = %e, "failed to remove maildir");
            }
        }
    }

    /// Realized usage in bytes. A missing tree or a failed measurement both
    /// report zero, since an unpopulated mailbox is valid.
    #[tracing::instrument(name = "Measuring maildir usage", skip(self))]
    pub async fn usage_bytes(&self, domain: &DomainName, local: &LocalPart) -> u64 {
        let root = match self.path_for(domain, local) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(error = %e, "refusing to measure unconfined maildir path");
                return 0;
            }
        };
        if tokio::fs::metadata(&root).await.is_err() {
            return 0;
        }
        match self.commands.measure_directory_size(&root).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(path = %root.display(), error = %e, "directory measurement failed");
                0
            }
        }
    }
}
