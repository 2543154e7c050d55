use super::models::domain_name::DomainNameError;
use super::models::local_part::{EmailAddressError, LocalPartError};
use super::models::password::MailboxPasswordError;
use super::models::selector::DkimSelectorError;

/// The failure taxonomy every provisioning operation resolves into.
///
/// Validation short-circuits before any side effect; everything from the
/// locking step onward rolls the enclosing transaction back before one of
/// these reaches the caller.
#[derive(thiserror::Error, Debug)]
pub enum ProvisioningError {
    #[error("Validation error on {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{0}")]
    Conflict(ConflictKind),
    #[error("{0} not found")]
    NotFound(String),
    #[error("External tool failed: {0}")]
    ExternalTool(String),
    #[error("Timed out waiting for the signing configuration lock")]
    LockTimeout,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConflictKind {
    #[error("Domain {0} already exists")]
    DomainExists(String),
    #[error("Domain {domain} still has {mailbox_count} mailbox(es)")]
    DomainHasMailboxes { domain: String, mailbox_count: i64 },
    #[error("Mailbox {0} already exists")]
    MailboxExists(String),
    #[error("Alias source {0} is already taken")]
    AliasExists(String),
    #[error("Alias source {0} collides with an existing mailbox")]
    AliasCollidesWithMailbox(String),
    #[error("Duplicate value for {0}")]
    DuplicateKey(String),
}

impl ProvisioningError {
    pub fn validation(field: &'static str, reason: impl ToString) -> Self {
        Self::Validation {
            field,
            reason: reason.to_string(),
        }
    }
}

impl From<DomainNameError> for ProvisioningError {
    fn from(e: DomainNameError) -> Self {
        Self::validation("domain", e)
    }
}

impl From<LocalPartError> for ProvisioningError {
    fn from(e: LocalPartError) -> Self {
        Self::validation("local_part", e)
    }
}

impl From<EmailAddressError> for ProvisioningError {
    fn from(e: EmailAddressError) -> Self {
        Self::validation("email", e)
    }
}

impl From<DkimSelectorError> for ProvisioningError {
    fn from(e: DkimSelectorError) -> Self {
        Self::validation("dkim_selector", e)
    }
}

impl From<MailboxPasswordError> for ProvisioningError {
    fn from(e: MailboxPasswordError) -> Self {
        Self::validation("password", e)
    }
}
