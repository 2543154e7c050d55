use crate::configuration::DatabaseSettings;
use crate::domain::provisioning::models::{
    domain_name::DomainName,
    local_part::EmailAddress,
    records::{AliasRecord, ApiKeyRecord, DkimKeyMaterial, DomainRecord, MailboxRecord},
    selector::DkimSelector,
};
use crate::domain::provisioning::ports::{
    AliasCollision, InsertAlias, InsertDomain, InsertMailbox, ProvisioningRepository,
    RepositoryError,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone, Debug)]
pub struct PostgresDb {
    pool: PgPool,
}

/// Transaction guard handed to the orchestrator between `begin_*` and
/// `commit`. Dropping it rolls the transaction (and its locks) back.
pub type PgTx = Transaction<'static, Postgres>;

fn db_error(e: sqlx::Error, entity: &str) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION) {
            return RepositoryError::Duplicate(entity.to_string());
        }
    }
    RepositoryError::Unexpected(anyhow::Error::from(e))
}

impl PostgresDb {
    pub fn new(configuration: &DatabaseSettings) -> PostgresDb {
        PostgresDb {
            pool: PgPoolOptions::new()
                .acquire_timeout(std::time::Duration::from_secs(2))
                .connect_lazy_with(configuration.with_db()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<PgTx, RepositoryError> {
        self.pool
            .begin()
            .await
            .context("Failed to acquire a Postgres connection from the pool")
            .map_err(RepositoryError::Unexpected)
    }

    /// Transaction-scoped advisory lock; released automatically on
    /// commit or rollback. Serializes creators racing on the same key
    /// before any row for it exists.
    async fn advisory_xact_lock(tx: &mut PgTx, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error(e, "advisory lock"))?;
        Ok(())
    }

    async fn fetch_domain_locked(
        tx: &mut PgTx,
        name: &str,
        clause: &str,
    ) -> Result<Option<DomainRecord>, RepositoryError> {
        let query = format!(
            "SELECT id, name, dkim_selector, dkim_private_key, dkim_public_key, \
             spf_record, dmarc_record, server_ip, created_at \
             FROM domains WHERE name = $1 {clause}"
        );
        sqlx::query_as::<_, DomainRecord>(&query)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| db_error(e, "domains"))
    }
}

#[async_trait]
impl ProvisioningRepository for PostgresDb {
    type Tx = PgTx;

    #[tracing::instrument(name = "Locking domain name for creation", skip(self))]
    async fn begin_domain_create(
        &self,
        name: &DomainName,
    ) -> Result<(PgTx, Option<DomainRecord>), RepositoryError> {
        let mut tx = self.begin().await?;
        Self::advisory_xact_lock(&mut tx, &format!("domain:{}", name)).await?;
        let existing = Self::fetch_domain_locked(&mut tx, name.as_ref(), "").await?;
        Ok((tx, existing))
    }

    #[tracing::instrument(name = "Inserting domain row", skip(self, tx, domain))]
    async fn insert_domain(
        &self,
        tx: &mut PgTx,
        domain: InsertDomain,
    ) -> Result<DomainRecord, RepositoryError> {
        sqlx::query_as::<_, DomainRecord>(
            "INSERT INTO domains \
             (id, name, dkim_selector, dkim_private_key, dkim_public_key, \
              spf_record, dmarc_record, server_ip, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING id, name, dkim_selector, dkim_private_key, dkim_public_key, \
             spf_record, dmarc_record, server_ip, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(domain.name.as_ref())
        .bind(domain.selector.as_ref())
        .bind(&domain.material.private_key_pem)
        .bind(&domain.material.public_key)
        .bind(&domain.spf_record)
        .bind(&domain.dmarc_record)
        .bind(&domain.server_ip)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| db_error(e, "domains.name"))
    }

    #[tracing::instrument(name = "Locking domain row for deletion", skip(self))]
    async fn begin_domain_delete(
        &self,
        name: &DomainName,
    ) -> Result<Option<(PgTx, DomainRecord, i64)>, RepositoryError> {
        let mut tx = self.begin().await?;
        let domain = match Self::fetch_domain_locked(&mut tx, name.as_ref(), "FOR UPDATE").await? {
            Some(domain) => domain,
            None => return Ok(None),
        };
        // The row lock blocks mailbox creators (they take the same row FOR
        // SHARE), so this count stays truthful until the tx concludes.
        let mailbox_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mailboxes WHERE domain_id = $1")
                .bind(domain.id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error(e, "mailboxes"))?;
        Ok(Some((tx, domain, mailbox_count)))
    }

    #[tracing::instrument(name = "Deleting domain row", skip(self, tx))]
    async fn delete_domain(&self, tx: &mut PgTx, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM domains WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error(e, "domains"))?;
        Ok(())
    }

    #[tracing::instrument(name = "Locking domain row for update", skip(self))]
    async fn begin_domain_update(
        &self,
        name: &DomainName,
    ) -> Result<Option<(PgTx, DomainRecord)>, RepositoryError> {
        let mut tx = self.begin().await?;
        match Self::fetch_domain_locked(&mut tx, name.as_ref(), "FOR UPDATE").await? {
            Some(domain) => Ok(Some((tx, domain))),
            None => Ok(None),
        }
    }

    #[tracing::instrument(name = "Updating domain key material", skip(self, tx, material))]
    async fn update_domain_keys(
        &self,
        tx: &mut PgTx,
        id: Uuid,
        selector: &DkimSelector,
        material: &DkimKeyMaterial,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE domains SET dkim_selector = $2, dkim_private_key = $3, dkim_public_key = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(selector.as_ref())
        .bind(&material.private_key_pem)
        .bind(&material.public_key)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error(e, "domains"))?;
        Ok(())
    }

    #[tracing::instrument(name = "Locking mailbox email for creation", skip(self))]
    async fn begin_mailbox_create(
        &self,
        email: &EmailAddress,
    ) -> Result<(PgTx, Option<DomainRecord>, bool), RepositoryError> {
        let mut tx = self.begin().await?;
        Self::advisory_xact_lock(&mut tx, &format!("mailbox:{}", email)).await?;
        // A shared lock suffices: it blocks domain deletion (FOR UPDATE)
        // without serializing mailbox creators on different addresses.
        let domain =
            Self::fetch_domain_locked(&mut tx, email.domain().as_ref(), "FOR SHARE").await?;
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM mailboxes WHERE email = $1)")
                .bind(email.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error(e, "mailboxes"))?;
        Ok((tx, domain, taken))
    }

    #[tracing::instrument(name = "Inserting mailbox row", skip(self, tx, mailbox))]
    async fn insert_mailbox(
        &self,
        tx: &mut PgTx,
        mailbox: InsertMailbox,
    ) -> Result<MailboxRecord, RepositoryError> {
        sqlx::query_as::<_, MailboxRecord>(
            "INSERT INTO mailboxes (id, domain_id, email, password_hash, quota_mb, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, domain_id, email, password_hash, quota_mb, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(mailbox.domain_id)
        .bind(mailbox.email.to_string())
        .bind(&mailbox.password_hash)
        .bind(mailbox.quota_mb)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| db_error(e, "mailboxes.email"))
    }

    #[tracing::instrument(name = "Locking mailbox row for deletion", skip(self))]
    async fn begin_mailbox_delete(
        &self,
        email: &EmailAddress,
    ) -> Result<Option<(PgTx, MailboxRecord)>, RepositoryError> {
        let mut tx = self.begin().await?;
        let mailbox = sqlx::query_as::<_, MailboxRecord>(
            "SELECT id, domain_id, email, password_hash, quota_mb, created_at \
             FROM mailboxes WHERE email = $1 FOR UPDATE",
        )
        .bind(email.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error(e, "mailboxes"))?;
        Ok(mailbox.map(|mailbox| (tx, mailbox)))
    }

    #[tracing::instrument(name = "Deleting mailbox row", skip(self, tx))]
    async fn delete_mailbox(&self, tx: &mut PgTx, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM mailboxes WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error(e, "mailboxes"))?;
        Ok(())
    }

    #[tracing::instrument(name = "Locking alias source for creation", skip(self))]
    async fn begin_alias_create(
        &self,
        source: &EmailAddress,
    ) -> Result<(PgTx, Option<DomainRecord>, AliasCollision), RepositoryError> {
        let mut tx = self.begin().await?;
        Self::advisory_xact_lock(&mut tx, &format!("alias:{}", source)).await?;
        let domain =
            Self::fetch_domain_locked(&mut tx, source.domain().as_ref(), "FOR SHARE").await?;
        let alias_taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM aliases WHERE source = $1)")
                .bind(source.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error(e, "aliases"))?;
        let mailbox_taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM mailboxes WHERE email = $1)")
                .bind(source.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error(e, "mailboxes"))?;
        let collision = if alias_taken {
            AliasCollision::ExistingAlias
        } else if mailbox_taken {
            AliasCollision::ExistingMailbox
        } else {
            AliasCollision::None
        };
        Ok((tx, domain, collision))
    }

    #[tracing::instrument(name = "Inserting alias row", skip(self, tx, alias))]
    async fn insert_alias(
        &self,
        tx: &mut PgTx,
        alias: InsertAlias,
    ) -> Result<AliasRecord, RepositoryError> {
        sqlx::query_as::<_, AliasRecord>(
            "INSERT INTO aliases (id, domain_id, source, destination, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, domain_id, source, destination, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(alias.domain_id)
        .bind(alias.source.to_string())
        .bind(&alias.destination)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| db_error(e, "aliases.source"))
    }

    async fn commit(&self, tx: PgTx) -> Result<(), RepositoryError> {
        tx.commit()
            .await
            .context("Failed to commit SQL transaction")
            .map_err(RepositoryError::Unexpected)
    }

    #[tracing::instrument(name = "Fetching domain", skip(self))]
    async fn get_domain(&self, name: &str) -> Result<Option<DomainRecord>, RepositoryError> {
        sqlx::query_as::<_, DomainRecord>(
            "SELECT id, name, dkim_selector, dkim_private_key, dkim_public_key, \
             spf_record, dmarc_record, server_ip, created_at \
             FROM domains WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(e, "domains"))
    }

    #[tracing::instrument(name = "Listing domains", skip(self))]
    async fn list_domains(&self) -> Result<Vec<DomainRecord>, RepositoryError> {
        sqlx::query_as::<_, DomainRecord>(
            "SELECT id, name, dkim_selector, dkim_private_key, dkim_public_key, \
             spf_record, dmarc_record, server_ip, created_at \
             FROM domains ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(e, "domains"))
    }

    #[tracing::instrument(name = "Fetching mailbox", skip(self))]
    async fn get_mailbox(&self, email: &str) -> Result<Option<MailboxRecord>, RepositoryError> {
        sqlx::query_as::<_, MailboxRecord>(
            "SELECT id, domain_id, email, password_hash, quota_mb, created_at \
             FROM mailboxes WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(e, "mailboxes"))
    }

    #[tracing::instrument(name = "Listing mailboxes", skip(self))]
    async fn list_mailboxes(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<MailboxRecord>, RepositoryError> {
        let result = match domain {
            Some(domain) => {
                sqlx::query_as::<_, MailboxRecord>(
                    "SELECT m.id, m.domain_id, m.email, m.password_hash, m.quota_mb, m.created_at \
                     FROM mailboxes m JOIN domains d ON m.domain_id = d.id \
                     WHERE d.name = $1 ORDER BY m.email",
                )
                .bind(domain)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, MailboxRecord>(
                    "SELECT id, domain_id, email, password_hash, quota_mb, created_at \
                     FROM mailboxes ORDER BY email",
                )
                .fetch_all(&self.pool)
                .await
            }
        };
        result.map_err(|e| db_error(e, "mailboxes"))
    }

    #[tracing::instrument(name = "Updating mailbox password", skip(self, password_hash))]
    async fn update_mailbox_password(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE mailboxes SET password_hash = $2 WHERE email = $1")
            .bind(email)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, "mailboxes"))?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Listing aliases", skip(self))]
    async fn list_aliases(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<AliasRecord>, RepositoryError> {
        let result = match domain {
            Some(domain) => {
                sqlx::query_as::<_, AliasRecord>(
                    "SELECT a.id, a.domain_id, a.source, a.destination, a.created_at \
                     FROM aliases a JOIN domains d ON a.domain_id = d.id \
                     WHERE d.name = $1 ORDER BY a.source",
                )
                .bind(domain)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, AliasRecord>(
                    "SELECT id, domain_id, source, destination, created_at \
                     FROM aliases ORDER BY source",
                )
                .fetch_all(&self.pool)
                .await
            }
        };
        result.map_err(|e| db_error(e, "aliases"))
    }

    #[tracing::instrument(name = "Deleting alias", skip(self))]
    async fn delete_alias(&self, source: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM aliases WHERE source = $1")
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, "aliases"))?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Looking up API key", skip(self, key))]
    async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>, RepositoryError> {
        sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT id, key, description, created_at, last_used_at \
             FROM api_keys WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(e, "api_keys"))
    }

    #[tracing::instrument(name = "Touching API key", skip(self))]
    async fn touch_api_key(&self, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, "api_keys"))?;
        Ok(())
    }

    #[tracing::instrument(name = "Inserting API key row", skip(self, key))]
    async fn insert_api_key(
        &self,
        key: &str,
        description: &str,
    ) -> Result<ApiKeyRecord, RepositoryError> {
        sqlx::query_as::<_, ApiKeyRecord>(
            "INSERT INTO api_keys (id, key, description, created_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, key, description, created_at, last_used_at",
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, "api_keys"))
    }

    #[tracing::instrument(name = "Listing API keys", skip(self))]
    async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>, RepositoryError> {
        sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT id, key, description, created_at, last_used_at \
             FROM api_keys ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(e, "api_keys"))
    }

    #[tracing::instrument(name = "Deleting API key", skip(self))]
    async fn delete_api_key(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, "api_keys"))?;
        Ok(result.rows_affected() > 0)
    }
}
