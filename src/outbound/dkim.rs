use crate::domain::provisioning::errors::ProvisioningError;
use crate::domain::provisioning::models::records::DkimKeyMaterial;
use crate::domain::provisioning::models::{domain_name::DomainName, selector::DkimSelector};
use crate::domain::provisioning::ports::{CommandError, SystemCommands};
use crate::outbound::maildir::{confined_path, MaildirError};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum KeygenError {
    #[error("Resolved path escapes the key directory: {0}")]
    Escape(String),
    #[error("Filesystem operation on key material failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Could not extract a public key from the generated TXT record")]
    MissingPublicKey,
}

impl From<MaildirError> for KeygenError {
    fn from(error: MaildirError) -> Self {
        match error {
            MaildirError::Escape(s) => KeygenError::Escape(s),
            MaildirError::Io(e) => KeygenError::Io(e),
            MaildirError::Command(e) => KeygenError::Command(e),
        }
    }
}

impl From<KeygenError> for ProvisioningError {
    fn from(error: KeygenError) -> Self {
        match error {
            KeygenError::Escape(path) => ProvisioningError::Unexpected(anyhow::anyhow!(
                "confinement check rejected {path}"
            )),
            KeygenError::Command(e) => e.into(),
            other => ProvisioningError::ExternalTool(other.to_string()),
        }
    }
}

/// Produces DKIM key material on disk and the DNS-ready public key payload.
///
/// Generation is deliberately not idempotent: invoking it twice for the
/// same (domain, selector) overwrites the files. Rotation therefore always
/// runs with a fresh selector so a key still published in DNS is never
/// clobbered.
#[derive(Debug, Clone)]
pub struct KeyMaterialGenerator<C>
where
    C: SystemCommands,
{
    keys_dir: PathBuf,
    signing_owner: String,
    commands: Arc<C>,
}

impl<C> KeyMaterialGenerator<C>
where
    C: SystemCommands,
{
    pub fn new(keys_dir: PathBuf, signing_owner: String, commands: Arc<C>) -> Self {
        Self {
            keys_dir,
            signing_owner,
            commands,
        }
    }

    fn domain_dir(&self, domain: &DomainName) -> Result<PathBuf, KeygenError> {
        Ok(confined_path(&self.keys_dir, &[domain.as_ref()])?)
    }

    #[tracing::instrument(name = "Generating DKIM key material", skip(self))]
    pub async fn generate(
        &self,
        domain: &DomainName,
        selector: &DkimSelector,
    ) -> Result<DkimKeyMaterial, KeygenError> {
        let dir = self.domain_dir(domain)?;
        tokio::fs::create_dir_all(&dir).await?;

        self.commands
            .generate_key_pair(domain, selector, &dir)
            .await?;

        let private_key_path = confined_path(&dir, &[&format!("{}.private", selector)])?;
        let txt_path = confined_path(&dir, &[&format!("{}.txt", selector)])?;

        // Only the API process and the signing daemon's group may read the key.
        tokio::fs::set_permissions(&private_key_path, std::fs::Permissions::from_mode(0o600))
            .await?;
        self.commands
            .change_owner(&private_key_path, &self.signing_owner)
            .await?;

        let txt_content =
            tokio::fs::read_to_string(&txt_path)
                .await
                .map_err(|e| CommandError::UnreadableOutput {
                    command: "opendkim-genkey",
                    reason: e.to_string(),
                })?;
        let public_key =
            extract_public_key(&txt_content).ok_or(KeygenError::MissingPublicKey)?;
        let private_key_pem = tokio::fs::read_to_string(&private_key_path).await.map_err(
            |e| CommandError::UnreadableOutput {
                command: "opendkim-genkey",
                reason: e.to_string(),
            },
        )?;

        Ok(DkimKeyMaterial {
            private_key_path,
            private_key_pem,
            public_key,
        })
    }

    /// Best-effort removal of one selector's files, used to undo a
    /// generation whose enclosing transaction failed.
    #[tracing::instrument(name = "Removing DKIM selector files", skip(self))]
    pub async fn remove_selector(&self, domain: &DomainName, selector: &DkimSelector) {
        let dir = match self.domain_dir(domain) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(error = %e, "refusing to remove unconfined key path");
                return;
            }
        };
        for suffix in ["private", "txt"] {
            let path = dir.join(format!("{}.{}", selector, suffix));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove key file");
                }
            }
        }
    }

    /// Best-effort removal of a domain's whole key directory after the row
    /// is gone.
    #[tracing::instrument(name = "Removing DKIM key directory", skip(self))]
    pub async fn remove_domain(&self, domain: &DomainName) {
        let dir = match self.domain_dir(domain) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(error = %e, "refusing to remove unconfined key path");
                return;
            }
        };
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "failed to remove key directory");
            }
        }
    }
}

/// Pulls the base64 `p=` payload out of an opendkim-genkey TXT record,
/// stitching together payloads split across quoted strings:
///
/// ```text
/// mail._domainkey IN TXT ( "v=DKIM1; k=rsa; "
///     "p=MIGfMA0GCSqGSIb3..." "...rest" )  ; ----- DKIM key mail
/// ```
pub(crate) fn extract_public_key(txt: &str) -> Option<String> {
    let start = txt.find("p=")? + 2;
    let mut payload = String::new();
    for c in txt[start..].chars() {
        match c {
            c if c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=' => payload.push(c),
            '"' | ' ' | '\n' | '\r' | '\t' => continue,
            _ => break,
        }
    }
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}
