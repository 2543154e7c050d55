use std::sync::Arc;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use uuid::Uuid;

use super::errors::{ConflictKind, ProvisioningError};
use super::models::{
    domain_name::DomainName,
    local_part::EmailAddress,
    password::{MailboxPassword, PasswordPolicy},
    records::{
        dmarc_record, spf_record, AliasRecord, ApiKeyRecord, CreateAliasRequest,
        CreateApiKeyRequest, CreateDomainRequest, CreateMailboxRequest, DkimKeyMaterial,
        DnsRecordSet, DomainRecord, MailboxRecord, NewAlias, NewDomain, NewMailbox,
        ProvisionedDomain, QuotaUsage, RotateDkimRequest, RotatedDkim, UpdatePasswordRequest,
        DEFAULT_QUOTA_MB, DEFAULT_SELECTOR,
    },
    selector::DkimSelector,
};
use super::ports::{
    AliasCollision, InsertAlias, InsertDomain, InsertMailbox, ProvisioningRepository,
    ProvisioningService, SystemCommands,
};
use crate::configuration::ProvisioningSettings;
use crate::outbound::cache::ReadCache;
use crate::outbound::dkim::KeyMaterialGenerator;
use crate::outbound::ip_lookup::IpLookupClient;
use crate::outbound::maildir::MaildirManager;
use crate::outbound::signing_config::SigningConfig;

/// The orchestrator behind every provisioning operation.
///
/// Mutations follow the same shape: validate, open a locking transaction,
/// check existence under the lock, perform privileged side effects, write
/// the row, commit. Any failure after a side effect triggers a best-effort
/// cleanup of the artifacts produced so far; the database transaction rolls
/// back by being dropped.
pub struct Provisioner<R, C>
where
    R: ProvisioningRepository,
    C: SystemCommands,
{
    repo: R,
    commands: Arc<C>,
    keygen: KeyMaterialGenerator<C>,
    signing: SigningConfig<C>,
    maildir: MaildirManager<C>,
    ip_lookup: IpLookupClient,
    cache: ReadCache,
    hostname: String,
    password_policy: PasswordPolicy,
}

impl<R, C> Provisioner<R, C>
where
    R: ProvisioningRepository,
    C: SystemCommands,
{
    pub fn new(
        settings: &ProvisioningSettings,
        repo: R,
        commands: Arc<C>,
        ip_lookup: IpLookupClient,
        cache: ReadCache,
    ) -> Self {
        let keygen = KeyMaterialGenerator::new(
            settings.dkim_keys_dir.clone(),
            settings.signing_owner.clone(),
            commands.clone(),
        );
        let signing = SigningConfig::new(
            settings.key_table_path.clone(),
            settings.signing_table_path.clone(),
            settings.lock_max_attempts,
            std::time::Duration::from_millis(settings.lock_base_delay_ms),
            commands.clone(),
        );
        let maildir = MaildirManager::new(
            settings.vmail_dir.clone(),
            settings.storage_owner.clone(),
            commands.clone(),
        );
        Self {
            repo,
            commands,
            keygen,
            signing,
            maildir,
            ip_lookup,
            cache,
            hostname: settings.hostname.clone(),
            password_policy: PasswordPolicy {
                min_length: settings.password_policy.min_length,
                min_character_classes: settings.password_policy.min_character_classes,
            },
        }
    }

    fn parse_new_domain(&self, request: CreateDomainRequest) -> Result<NewDomain, ProvisioningError> {
        let name = DomainName::parse(request.name)?;
        let selector = DkimSelector::parse(
            request
                .dkim_selector
                .unwrap_or_else(|| DEFAULT_SELECTOR.to_string()),
        )?;
        Ok(NewDomain { name, selector })
    }

    fn parse_new_mailbox(
        &self,
        request: CreateMailboxRequest,
    ) -> Result<NewMailbox, ProvisioningError> {
        let email = EmailAddress::parse(request.email)?;
        let password = MailboxPassword::parse(request.password, &self.password_policy)?;
        let quota_mb = request.quota_mb.unwrap_or(DEFAULT_QUOTA_MB);
        if quota_mb <= 0 {
            return Err(ProvisioningError::validation(
                "quota_mb",
                "quota must be a positive number of megabytes",
            ));
        }
        Ok(NewMailbox {
            email,
            password,
            quota_mb,
        })
    }

    fn parse_new_alias(&self, request: CreateAliasRequest) -> Result<NewAlias, ProvisioningError> {
        let source = EmailAddress::parse(request.source)?;
        if !validator::validate_email(&request.destination) {
            return Err(ProvisioningError::validation(
                "destination",
                "destination is not a valid email address",
            ));
        }
        if source.to_string() == request.destination {
            return Err(ProvisioningError::validation(
                "destination",
                "alias cannot point at itself",
            ));
        }
        Ok(NewAlias {
            source,
            destination: request.destination,
        })
    }

    /// Key files exist at this point; undo them if the signing tables or
    /// the row write fail.
    async fn write_domain(
        &self,
        tx: &mut R::Tx,
        new_domain: &NewDomain,
        material: &DkimKeyMaterial,
        server_ip: &str,
    ) -> Result<DomainRecord, ProvisioningError> {
        self.signing
            .register(
                &new_domain.name,
                &new_domain.selector,
                &material.private_key_path,
            )
            .await?;
        let record = self
            .repo
            .insert_domain(
                tx,
                InsertDomain {
                    name: new_domain.name.clone(),
                    selector: new_domain.selector.clone(),
                    material: material.clone(),
                    spf_record: spf_record(server_ip, &self.hostname),
                    dmarc_record: dmarc_record(&new_domain.name),
                    server_ip: server_ip.to_string(),
                },
            )
            .await?;
        Ok(record)
    }
}

#[async_trait]
impl<R, C> ProvisioningService for Provisioner<R, C>
where
    R: ProvisioningRepository,
    C: SystemCommands,
{
    #[tracing::instrument(name = "Provisioning a new domain", skip(self, request), fields(domain = %request.name))]
    async fn create_domain(
        &self,
        request: CreateDomainRequest,
    ) -> Result<ProvisionedDomain, ProvisioningError> {
        let new_domain = self.parse_new_domain(request)?;

        let (mut tx, existing) = self.repo.begin_domain_create(&new_domain.name).await?;
        if existing.is_some() {
            return Err(ProvisioningError::Conflict(ConflictKind::DomainExists(
                new_domain.name.to_string(),
            )));
        }

        let server_ip = self.ip_lookup.public_ip().await;
        let material = match self
            .keygen
            .generate(&new_domain.name, &new_domain.selector)
            .await
        {
            Ok(material) => material,
            Err(e) => {
                self.keygen
                    .remove_selector(&new_domain.name, &new_domain.selector)
                    .await;
                return Err(e.into());
            }
        };

        let record = match self
            .write_domain(&mut tx, &new_domain, &material, &server_ip)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.keygen
                    .remove_selector(&new_domain.name, &new_domain.selector)
                    .await;
                return Err(e);
            }
        };
        if let Err(e) = self.repo.commit(tx).await {
            self.keygen
                .remove_selector(&new_domain.name, &new_domain.selector)
                .await;
            return Err(e.into());
        }

        self.cache.invalidate_collection("domains");
        let dns = DnsRecordSet::assemble(&record, &self.hostname);
        Ok(ProvisionedDomain { record, dns })
    }

    #[tracing::instrument(name = "Deleting a domain", skip(self))]
    async fn delete_domain(&self, name: &str) -> Result<(), ProvisioningError> {
        let name = DomainName::parse(name.to_string())?;

        let (mut tx, record, mailbox_count) = self
            .repo
            .begin_domain_delete(&name)
            .await?
            .ok_or_else(|| ProvisioningError::NotFound(format!("Domain {}", name)))?;
        if mailbox_count > 0 {
            return Err(ProvisioningError::Conflict(
                ConflictKind::DomainHasMailboxes {
                    domain: name.to_string(),
                    mailbox_count,
                },
            ));
        }

        self.repo.delete_domain(&mut tx, record.id).await?;
        self.repo.commit(tx).await?;

        // Stale signing-table lines for a removed key are harmless to the
        // daemon and get rewritten on the next registration for this name.
        self.keygen.remove_domain(&name).await;
        self.cache.invalidate_collection("domains");
        Ok(())
    }

    #[tracing::instrument(name = "Rotating DKIM keys", skip(self, request))]
    async fn rotate_dkim(
        &self,
        name: &str,
        request: RotateDkimRequest,
    ) -> Result<RotatedDkim, ProvisioningError> {
        let name = DomainName::parse(name.to_string())?;
        let new_selector = DkimSelector::parse(request.new_selector)?;

        let (mut tx, record) = self
            .repo
            .begin_domain_update(&name)
            .await?
            .ok_or_else(|| ProvisioningError::NotFound(format!("Domain {}", name)))?;
        if record.dkim_selector == new_selector.as_ref() {
            return Err(ProvisioningError::validation(
                "new_selector",
                "new selector must differ from the current one",
            ));
        }
        let old_selector = DkimSelector::parse(record.dkim_selector.clone())
            .map_err(|e| ProvisioningError::Unexpected(anyhow::Error::from(e)))?;

        let material = match self.keygen.generate(&name, &new_selector).await {
            Ok(material) => material,
            Err(e) => {
                self.keygen.remove_selector(&name, &new_selector).await;
                return Err(e.into());
            }
        };

        let rotate = async {
            self.signing
                .register(&name, &new_selector, &material.private_key_path)
                .await?;
            self.repo
                .update_domain_keys(&mut tx, record.id, &new_selector, &material)
                .await?;
            Ok::<(), ProvisioningError>(())
        };
        if let Err(e) = rotate.await {
            self.keygen.remove_selector(&name, &new_selector).await;
            return Err(e);
        }
        if let Err(e) = self.repo.commit(tx).await {
            self.keygen.remove_selector(&name, &new_selector).await;
            return Err(e.into());
        }

        // The old key files are only removed once the new row is durable,
        // so the daemon never loses its active key mid-rotation.
        self.keygen.remove_selector(&name, &old_selector).await;
        self.cache.invalidate_collection("domains");

        let record = DomainRecord {
            dkim_selector: new_selector.as_ref().to_string(),
            dkim_private_key: material.private_key_pem.clone(),
            dkim_public_key: material.public_key.clone(),
            ..record
        };
        let dns = DnsRecordSet::assemble(&record, &self.hostname);
        Ok(RotatedDkim {
            record,
            old_selector: old_selector.as_ref().to_string(),
            dns,
        })
    }

    async fn get_domain(&self, name: &str) -> Result<DomainRecord, ProvisioningError> {
        let name = DomainName::parse(name.to_string())?;
        self.repo
            .get_domain(name.as_ref())
            .await?
            .ok_or_else(|| ProvisioningError::NotFound(format!("Domain {}", name)))
    }

    async fn list_domains(&self) -> Result<Vec<DomainRecord>, ProvisioningError> {
        Ok(self.repo.list_domains().await?)
    }

    async fn dns_records(&self, name: &str) -> Result<DnsRecordSet, ProvisioningError> {
        let record = self.get_domain(name).await?;
        Ok(DnsRecordSet::assemble(&record, &self.hostname))
    }

    #[tracing::instrument(name = "Provisioning a new mailbox", skip(self, request), fields(email = %request.email))]
    async fn create_mailbox(
        &self,
        request: CreateMailboxRequest,
    ) -> Result<MailboxRecord, ProvisioningError> {
        let new_mailbox = self.parse_new_mailbox(request)?;
        let email = &new_mailbox.email;

        let (mut tx, domain, taken) = self.repo.begin_mailbox_create(email).await?;
        let domain = domain
            .ok_or_else(|| ProvisioningError::NotFound(format!("Domain {}", email.domain())))?;
        if taken {
            return Err(ProvisioningError::Conflict(ConflictKind::MailboxExists(
                email.to_string(),
            )));
        }

        let password_hash = self.commands.hash_password(&new_mailbox.password).await?;
        if let Err(e) = self.maildir.create(email.domain(), email.local()).await {
            // The tree may be partially built when the ownership hand-off
            // fails; reap whatever made it to disk.
            self.maildir.remove(email.domain(), email.local()).await;
            return Err(e.into());
        }

        let insert = async {
            let record = self
                .repo
                .insert_mailbox(
                    &mut tx,
                    InsertMailbox {
                        domain_id: domain.id,
                        email: email.clone(),
                        password_hash,
                        quota_mb: new_mailbox.quota_mb,
                    },
                )
                .await?;
            Ok::<MailboxRecord, ProvisioningError>(record)
        };
        let record = match insert.await {
            Ok(record) => record,
            Err(e) => {
                self.maildir.remove(email.domain(), email.local()).await;
                return Err(e);
            }
        };
        if let Err(e) = self.repo.commit(tx).await {
            self.maildir.remove(email.domain(), email.local()).await;
            return Err(e.into());
        }

        self.cache.invalidate_collection("mailboxes");
        Ok(record)
    }

    #[tracing::instrument(name = "Deleting a mailbox", skip(self))]
    async fn delete_mailbox(&self, email: &str) -> Result<(), ProvisioningError> {
        let email = EmailAddress::parse(email.to_string())?;

        let (mut tx, record) = self
            .repo
            .begin_mailbox_delete(&email)
            .await?
            .ok_or_else(|| ProvisioningError::NotFound(format!("Mailbox {}", email)))?;
        self.repo.delete_mailbox(&mut tx, record.id).await?;
        self.repo.commit(tx).await?;

        self.maildir.remove(email.domain(), email.local()).await;
        self.cache.invalidate_collection("mailboxes");
        Ok(())
    }

    #[tracing::instrument(name = "Updating a mailbox password", skip(self, request))]
    async fn update_mailbox_password(
        &self,
        email: &str,
        request: UpdatePasswordRequest,
    ) -> Result<(), ProvisioningError> {
        let email = EmailAddress::parse(email.to_string())?;
        let password = MailboxPassword::parse(request.password, &self.password_policy)?;

        let password_hash = self.commands.hash_password(&password).await?;
        let updated = self
            .repo
            .update_mailbox_password(&email.to_string(), &password_hash)
            .await?;
        if !updated {
            return Err(ProvisioningError::NotFound(format!("Mailbox {}", email)));
        }
        self.cache.invalidate_collection("mailboxes");
        Ok(())
    }

    async fn list_mailboxes(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<MailboxRecord>, ProvisioningError> {
        let domain = domain
            .map(|d| DomainName::parse(d.to_string()))
            .transpose()?;
        Ok(self
            .repo
            .list_mailboxes(domain.as_ref().map(|d| d.as_ref()))
            .await?)
    }

    async fn get_mailbox(&self, email: &str) -> Result<MailboxRecord, ProvisioningError> {
        let email = EmailAddress::parse(email.to_string())?;
        self.repo
            .get_mailbox(&email.to_string())
            .await?
            .ok_or_else(|| ProvisioningError::NotFound(format!("Mailbox {}", email)))
    }

    #[tracing::instrument(name = "Measuring mailbox quota usage", skip(self))]
    async fn quota_usage(&self, email: &str) -> Result<QuotaUsage, ProvisioningError> {
        let email = EmailAddress::parse(email.to_string())?;
        let record = self
            .repo
            .get_mailbox(&email.to_string())
            .await?
            .ok_or_else(|| ProvisioningError::NotFound(format!("Mailbox {}", email)))?;

        let used_bytes = self
            .maildir
            .usage_bytes(email.domain(), email.local())
            .await;
        Ok(QuotaUsage::new(
            record.email,
            used_bytes / (1024 * 1024),
            record.quota_mb,
        ))
    }

    #[tracing::instrument(name = "Creating an alias", skip(self, request), fields(source = %request.source))]
    async fn create_alias(
        &self,
        request: CreateAliasRequest,
    ) -> Result<AliasRecord, ProvisioningError> {
        let new_alias = self.parse_new_alias(request)?;

        let (mut tx, domain, collision) =
            self.repo.begin_alias_create(&new_alias.source).await?;
        let domain = domain.ok_or_else(|| {
            ProvisioningError::NotFound(format!("Domain {}", new_alias.source.domain()))
        })?;
        match collision {
            AliasCollision::None => {}
            AliasCollision::ExistingAlias => {
                return Err(ProvisioningError::Conflict(ConflictKind::AliasExists(
                    new_alias.source.to_string(),
                )));
            }
            AliasCollision::ExistingMailbox => {
                return Err(ProvisioningError::Conflict(
                    ConflictKind::AliasCollidesWithMailbox(new_alias.source.to_string()),
                ));
            }
        }

        let record = self
            .repo
            .insert_alias(
                &mut tx,
                InsertAlias {
                    domain_id: domain.id,
                    source: new_alias.source,
                    destination: new_alias.destination,
                },
            )
            .await?;
        self.repo.commit(tx).await?;

        self.cache.invalidate_collection("aliases");
        Ok(record)
    }

    #[tracing::instrument(name = "Deleting an alias", skip(self))]
    async fn delete_alias(&self, source: &str) -> Result<(), ProvisioningError> {
        let source = EmailAddress::parse(source.to_string())?;
        let deleted = self.repo.delete_alias(&source.to_string()).await?;
        if !deleted {
            return Err(ProvisioningError::NotFound(format!("Alias {}", source)));
        }
        self.cache.invalidate_collection("aliases");
        Ok(())
    }

    async fn list_aliases(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<AliasRecord>, ProvisioningError> {
        let domain = domain
            .map(|d| DomainName::parse(d.to_string()))
            .transpose()?;
        Ok(self
            .repo
            .list_aliases(domain.as_ref().map(|d| d.as_ref()))
            .await?)
    }

    async fn verify_api_key(&self, key: &str) -> Result<bool, ProvisioningError> {
        match self.repo.find_api_key(key).await? {
            Some(record) => {
                if let Err(e) = self.repo.touch_api_key(record.id).await {
                    tracing::warn!(error = %e, "failed to record API key usage");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[tracing::instrument(name = "Minting an API key", skip(self, request))]
    async fn create_api_key(
        &self,
        request: CreateApiKeyRequest,
    ) -> Result<ApiKeyRecord, ProvisioningError> {
        let description = request.description.trim();
        if description.is_empty() {
            return Err(ProvisioningError::validation(
                "description",
                "description must not be empty",
            ));
        }
        let key = generate_api_key();
        Ok(self.repo.insert_api_key(&key, description).await?)
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>, ProvisioningError> {
        Ok(self.repo.list_api_keys().await?)
    }

    #[tracing::instrument(name = "Deleting an API key", skip(self))]
    async fn delete_api_key(&self, id: Uuid) -> Result<(), ProvisioningError> {
        let deleted = self.repo.delete_api_key(id).await?;
        if !deleted {
            return Err(ProvisioningError::NotFound(format!("API key {}", id)));
        }
        Ok(())
    }
}

/// 40 alphanumeric characters of CSPRNG output.
fn generate_api_key() -> String {
    let mut rng = thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(40)
        .collect()
}
