use crate::domain::provisioning::models::password::MailboxPassword;
use crate::domain::provisioning::models::{domain_name::DomainName, selector::DkimSelector};
use crate::domain::provisioning::ports::{CommandError, SystemCommands};
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// The real capability runner: shells out for the privileged operations
/// and hashes passwords in-process with Argon2id.
#[derive(Debug, Clone, Default)]
pub struct ShellCommands;

impl ShellCommands {
    pub fn new() -> Self {
        Self
    }
}

async fn run(command: &'static str, mut cmd: Command) -> Result<Vec<u8>, CommandError> {
    let output = cmd.output().await.map_err(|e| CommandError::Failed {
        command,
        reason: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(CommandError::Failed {
            command,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

#[async_trait]
impl SystemCommands for ShellCommands {
    async fn generate_key_pair(
        &self,
        domain: &DomainName,
        selector: &DkimSelector,
        out_dir: &Path,
    ) -> Result<(), CommandError> {
        let mut cmd = Command::new("opendkim-genkey");
        cmd.arg("-b")
            .arg("2048")
            .arg("-d")
            .arg(domain.as_ref())
            .arg("-s")
            .arg(selector.as_ref())
            .arg("-D")
            .arg(out_dir);
        run("opendkim-genkey", cmd).await?;
        Ok(())
    }

    async fn change_owner(&self, path: &Path, owner: &str) -> Result<(), CommandError> {
        let mut cmd = Command::new("chown");
        cmd.arg("-R").arg(owner).arg(path);
        run("chown", cmd).await?;
        Ok(())
    }

    async fn reload_signing_daemon(&self) -> Result<(), CommandError> {
        let mut cmd = Command::new("systemctl");
        cmd.arg("reload").arg("opendkim");
        run("systemctl", cmd).await?;
        Ok(())
    }

    async fn hash_password(&self, password: &MailboxPassword) -> Result<String, CommandError> {
        let password = password.expose().to_string();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut rand::thread_rng());
            let params = Params::new(15000, 2, 1, None).map_err(|e| CommandError::Failed {
                command: "argon2",
                reason: e.to_string(),
            })?;
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| CommandError::Failed {
                    command: "argon2",
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| CommandError::Failed {
            command: "argon2",
            reason: e.to_string(),
        })?
    }

    async fn measure_directory_size(&self, path: &Path) -> Result<u64, CommandError> {
        let mut cmd = Command::new("du");
        cmd.arg("-sk").arg(path);
        let stdout = run("du", cmd).await?;
        let text = String::from_utf8_lossy(&stdout);
        let kilobytes: u64 = text
            .split_whitespace()
            .next()
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| CommandError::UnreadableOutput {
                command: "du",
                reason: format!("unexpected output: {}", text.trim()),
            })?;
        Ok(kilobytes * 1024)
    }
}
