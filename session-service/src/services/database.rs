//! PostgreSQL implementation of the store contracts.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::PgPool;

use super::store::{AccountStore, AuditStore, SessionStore};
use crate::models::{Account, AuditLogEntry, Session};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for Database {
    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<Account>, AppError> {
        Ok(
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE subject_id = $1")
                .bind(subject_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        Ok(
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_by_either(
        &self,
        subject_id: &str,
        email: &str,
    ) -> Result<Option<Account>, AppError> {
        // Prefer the subject match when both rows exist.
        Ok(sqlx::query_as::<_, Account>(
            r#"
            SELECT * FROM accounts
            WHERE subject_id = $1 OR LOWER(email) = LOWER($2)
            ORDER BY (subject_id = $1) DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create(&self, account: &Account) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                account_id, subject_id, email, display_name, avatar_url, role, is_approved,
                status, email_verified, email_verified_utc, primary_provider, last_login_utc,
                created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(account.account_id)
        .bind(&account.subject_id)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(&account.avatar_url)
        .bind(account.role.as_str())
        .bind(account.is_approved)
        .bind(account.status.as_str())
        .bind(account.email_verified)
        .bind(account.email_verified_utc)
        .bind(&account.primary_provider)
        .bind(account.last_login_utc)
        .bind(account.created_utc)
        .bind(account.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, account: &Account) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                subject_id = $2, email = $3, display_name = $4, avatar_url = $5, role = $6,
                is_approved = $7, status = $8, email_verified = $9, email_verified_utc = $10,
                primary_provider = $11, last_login_utc = $12, updated_utc = $13
            WHERE account_id = $1
            "#,
        )
        .bind(account.account_id)
        .bind(&account.subject_id)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(&account.avatar_url)
        .bind(account.role.as_str())
        .bind(account.is_approved)
        .bind(account.status.as_str())
        .bind(account.email_verified)
        .bind(account.email_verified_utc)
        .bind(&account.primary_provider)
        .bind(account.last_login_utc)
        .bind(account.updated_utc)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Account {} not found",
                account.account_id
            )));
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn claim_bootstrap(&self) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO bootstrap_marker (marker_id, claimed_utc) VALUES (1, NOW()) ON CONFLICT DO NOTHING",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn create(&self, session: &Session) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, account_id, credential_hash, ip_address, user_agent, created_utc, expiry_utc, revoked_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.session_id)
        .bind(session.account_id)
        .bind(&session.credential_hash)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_utc)
        .bind(session.expiry_utc)
        .bind(session.revoked_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_hash(&self, credential_hash: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE credential_hash = $1")
            .bind(credential_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditStore for Database {
    async fn insert(&self, entry: &AuditLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (audit_id, action, account_id, ip_address, user_agent, message, metadata, severity, request_id, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.audit_id)
        .bind(&entry.action)
        .bind(entry.account_id)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.message)
        .bind(&entry.metadata)
        .bind(&entry.severity)
        .bind(&entry.request_id)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
