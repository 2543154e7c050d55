use async_trait::async_trait;
use std::path::Path;
use uuid::Uuid;

use super::errors::{ConflictKind, ProvisioningError};
use super::models::{
    domain_name::DomainName,
    local_part::EmailAddress,
    password::MailboxPassword,
    records::{
        AliasRecord, ApiKeyRecord, CreateAliasRequest, CreateApiKeyRequest, CreateDomainRequest,
        CreateMailboxRequest, DkimKeyMaterial, DnsRecordSet, DomainRecord, MailboxRecord,
        ProvisionedDomain, QuotaUsage, RotateDkimRequest, RotatedDkim, UpdatePasswordRequest,
    },
    selector::DkimSelector,
};

/// Row data handed to the repository once every side effect succeeded.
#[derive(Debug, Clone)]
pub struct InsertDomain {
    pub name: DomainName,
    pub selector: DkimSelector,
    pub material: DkimKeyMaterial,
    pub spf_record: String,
    pub dmarc_record: String,
    pub server_ip: String,
}

#[derive(Debug, Clone)]
pub struct InsertMailbox {
    pub domain_id: Uuid,
    pub email: EmailAddress,
    pub password_hash: String,
    pub quota_mb: i32,
}

#[derive(Debug, Clone)]
pub struct InsertAlias {
    pub domain_id: Uuid,
    pub source: EmailAddress,
    pub destination: String,
}

/// What an alias source collides with, checked under the creation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasCollision {
    None,
    ExistingAlias,
    ExistingMailbox,
}

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    /// Unique-constraint backstop; the orchestrator's existence checks
    /// should catch duplicates first, but a row racing past them maps to
    /// a conflict rather than a 500.
    #[error("Duplicate value for {0}")]
    Duplicate(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<RepositoryError> for ProvisioningError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Duplicate(entity) => {
                ProvisioningError::Conflict(ConflictKind::DuplicateKey(entity))
            }
            RepositoryError::Unexpected(e) => ProvisioningError::Unexpected(e),
        }
    }
}

/// Store of provisioning rows.
///
/// Mutating operations are two-phase: a `begin_*` method opens a
/// transaction and takes the locks that serialize the operation, the
/// orchestrator performs its side effects, then `commit` finishes.
/// Dropping the transaction guard rolls everything back.
#[async_trait]
pub trait ProvisioningRepository: Send + Sync + 'static {
    type Tx: Send;

    /// Opens a transaction holding a lock scoped to `name` and reports
    /// whether a row for it already exists. A concurrent creator for the
    /// same name blocks here until this transaction concludes.
    async fn begin_domain_create(
        &self,
        name: &DomainName,
    ) -> Result<(Self::Tx, Option<DomainRecord>), RepositoryError>;

    async fn insert_domain(
        &self,
        tx: &mut Self::Tx,
        domain: InsertDomain,
    ) -> Result<DomainRecord, RepositoryError>;

    /// Locks the domain row for deletion and counts dependent mailboxes
    /// under the same transaction. `None` if the domain does not exist.
    async fn begin_domain_delete(
        &self,
        name: &DomainName,
    ) -> Result<Option<(Self::Tx, DomainRecord, i64)>, RepositoryError>;

    async fn delete_domain(&self, tx: &mut Self::Tx, id: Uuid) -> Result<(), RepositoryError>;

    /// Locks the domain row for a key rotation. `None` if it does not exist.
    async fn begin_domain_update(
        &self,
        name: &DomainName,
    ) -> Result<Option<(Self::Tx, DomainRecord)>, RepositoryError>;

    async fn update_domain_keys(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        selector: &DkimSelector,
        material: &DkimKeyMaterial,
    ) -> Result<(), RepositoryError>;

    /// Opens a transaction holding a lock scoped to `email`, a shared lock
    /// on the parent domain row (blocking concurrent domain deletion), and
    /// reports the parent row plus whether the address is already taken.
    async fn begin_mailbox_create(
        &self,
        email: &EmailAddress,
    ) -> Result<(Self::Tx, Option<DomainRecord>, bool), RepositoryError>;

    async fn insert_mailbox(
        &self,
        tx: &mut Self::Tx,
        mailbox: InsertMailbox,
    ) -> Result<MailboxRecord, RepositoryError>;

    async fn begin_mailbox_delete(
        &self,
        email: &EmailAddress,
    ) -> Result<Option<(Self::Tx, MailboxRecord)>, RepositoryError>;

    async fn delete_mailbox(&self, tx: &mut Self::Tx, id: Uuid) -> Result<(), RepositoryError>;

    /// Locks the alias source, shared-locks the parent domain and reports
    /// what, if anything, the source collides with.
    async fn begin_alias_create(
        &self,
        source: &EmailAddress,
    ) -> Result<(Self::Tx, Option<DomainRecord>, AliasCollision), RepositoryError>;

    async fn insert_alias(
        &self,
        tx: &mut Self::Tx,
        alias: InsertAlias,
    ) -> Result<AliasRecord, RepositoryError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), RepositoryError>;

    // Plain reads and single-row updates, no explicit locking.

    async fn get_domain(&self, name: &str) -> Result<Option<DomainRecord>, RepositoryError>;

    async fn list_domains(&self) -> Result<Vec<DomainRecord>, RepositoryError>;

    async fn get_mailbox(&self, email: &str) -> Result<Option<MailboxRecord>, RepositoryError>;

    async fn list_mailboxes(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<MailboxRecord>, RepositoryError>;

    /// Returns false when no such mailbox exists.
    async fn update_mailbox_password(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RepositoryError>;

    async fn list_aliases(&self, domain: Option<&str>)
        -> Result<Vec<AliasRecord>, RepositoryError>;

    /// Returns false when no such alias exists.
    async fn delete_alias(&self, source: &str) -> Result<bool, RepositoryError>;

    async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>, RepositoryError>;

    /// Best-effort `last_used_at` bump.
    async fn touch_api_key(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn insert_api_key(
        &self,
        key: &str,
        description: &str,
    ) -> Result<ApiKeyRecord, RepositoryError>;

    async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>, RepositoryError>;

    /// Returns false when no such key exists.
    async fn delete_api_key(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

/// The operations the HTTP layer drives. Implemented by the
/// orchestrator; handlers stay generic over it so tests can substitute
/// their own implementation.
#[async_trait]
pub trait ProvisioningService: Send + Sync + 'static {
    async fn create_domain(
        &self,
        request: CreateDomainRequest,
    ) -> Result<ProvisionedDomain, ProvisioningError>;

    async fn delete_domain(&self, name: &str) -> Result<(), ProvisioningError>;

    async fn rotate_dkim(
        &self,
        name: &str,
        request: RotateDkimRequest,
    ) -> Result<RotatedDkim, ProvisioningError>;

    async fn get_domain(&self, name: &str) -> Result<DomainRecord, ProvisioningError>;

    async fn list_domains(&self) -> Result<Vec<DomainRecord>, ProvisioningError>;

    async fn dns_records(&self, name: &str) -> Result<DnsRecordSet, ProvisioningError>;

    async fn create_mailbox(
        &self,
        request: CreateMailboxRequest,
    ) -> Result<MailboxRecord, ProvisioningError>;

    async fn delete_mailbox(&self, email: &str) -> Result<(), ProvisioningError>;

    async fn update_mailbox_password(
        &self,
        email: &str,
        request: UpdatePasswordRequest,
    ) -> Result<(), ProvisioningError>;

    async fn list_mailboxes(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<MailboxRecord>, ProvisioningError>;

    async fn get_mailbox(&self, email: &str) -> Result<MailboxRecord, ProvisioningError>;

    async fn quota_usage(&self, email: &str) -> Result<QuotaUsage, ProvisioningError>;

    async fn create_alias(
        &self,
        request: CreateAliasRequest,
    ) -> Result<AliasRecord, ProvisioningError>;

    async fn delete_alias(&self, source: &str) -> Result<(), ProvisioningError>;

    async fn list_aliases(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<AliasRecord>, ProvisioningError>;

    /// True when `key` matches a stored API key. Bumps `last_used_at`
    /// on a hit.
    async fn verify_api_key(&self, key: &str) -> Result<bool, ProvisioningError>;

    /// Mints a new key. The returned record carries the secret; this is
    /// the only time it is handed out.
    async fn create_api_key(
        &self,
        request: CreateApiKeyRequest,
    ) -> Result<ApiKeyRecord, ProvisioningError>;

    async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>, ProvisioningError>;

    async fn delete_api_key(&self, id: Uuid) -> Result<(), ProvisioningError>;
}

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("{command} failed: {reason}")]
    Failed { command: &'static str, reason: String },
    #[error("{command} produced unreadable output: {reason}")]
    UnreadableOutput { command: &'static str, reason: String },
}

impl From<CommandError> for ProvisioningError {
    fn from(error: CommandError) -> Self {
        ProvisioningError::ExternalTool(error.to_string())
    }
}

/// The privileged operations provisioning depends on. The real
/// implementation shells out; tests substitute a recording mock.
#[async_trait]
pub trait SystemCommands: Send + Sync + 'static {
    /// Writes `<selector>.private` and `<selector>.txt` into `out_dir`.
    /// Not idempotent: a second run for the same pair overwrites.
    async fn generate_key_pair(
        &self,
        domain: &DomainName,
        selector: &DkimSelector,
        out_dir: &Path,
    ) -> Result<(), CommandError>;

    async fn change_owner(&self, path: &Path, owner: &str) -> Result<(), CommandError>;

    async fn reload_signing_daemon(&self) -> Result<(), CommandError>;

    async fn hash_password(&self, password: &MailboxPassword) -> Result<String, CommandError>;

    /// Size of the tree under `path` in bytes.
    async fn measure_directory_size(&self, path: &Path) -> Result<u64, CommandError>;
}
