//! Persistence contracts consumed by the authentication core.
//!
//! `Database` implements them on PostgreSQL; `InMemoryStore` backs tests and
//! local development.

use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{Account, AuditLogEntry, Session};

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<Account>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError>;

    /// Subject id first, then email. Callers decide what an email match with a
    /// different linked subject means.
    async fn find_by_either(
        &self,
        subject_id: &str,
        email: &str,
    ) -> Result<Option<Account>, AppError> {
        if let Some(account) = self.find_by_subject(subject_id).await? {
            return Ok(Some(account));
        }
        self.find_by_email(email).await
    }

    /// Insert a new account. Fails with `AppError::Conflict` on a duplicate subject id or email.
    async fn create(&self, account: &Account) -> Result<(), AppError>;

    async fn update(&self, account: &Account) -> Result<(), AppError>;

    async fn count(&self) -> Result<u64, AppError>;

    /// Atomically claim the one-time bootstrap slot. Only one caller ever sees `true`.
    async fn claim_bootstrap(&self) -> Result<bool, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), AppError>;

    /// Delete the session whose credential hashes to `credential_hash`; returns rows removed.
    async fn delete_by_hash(&self, credential_hash: &str) -> Result<u64, AppError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, entry: &AuditLogEntry) -> Result<(), AppError>;
}

fn poisoned(e: impl std::fmt::Display) -> AppError {
    AppError::InternalError(anyhow::anyhow!("In-memory store mutex poisoned: {}", e))
}

/// In-process implementation of every store contract.
#[derive(Default)]
pub struct InMemoryStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
    sessions: Mutex<HashMap<String, Session>>,
    audit_logs: Mutex<Vec<AuditLogEntry>>,
    bootstrap_claimed: AtomicBool,
    fail_audit_writes: AtomicBool,
    fail_session_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent audit insert fail, to exercise error containment.
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_session_writes(&self, fail: bool) {
        self.fail_session_writes.store(fail, Ordering::SeqCst);
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts
            .lock()
            .map(|accounts| accounts.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit_logs
            .lock()
            .map(|logs| logs.clone())
            .unwrap_or_default()
    }

    /// Audit rows whose action code equals `action`.
    pub fn audit_entries_for(&self, action: &str) -> Vec<AuditLogEntry> {
        self.audit_entries()
            .into_iter()
            .filter(|entry| entry.action == action)
            .collect()
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<Account>, AppError> {
        let accounts = self.accounts.lock().map_err(poisoned)?;
        Ok(accounts
            .values()
            .find(|a| a.subject_id.as_deref() == Some(subject_id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let accounts = self.accounts.lock().map_err(poisoned)?;
        Ok(accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create(&self, account: &Account) -> Result<(), AppError> {
        let mut accounts = self.accounts.lock().map_err(poisoned)?;
        let duplicate = accounts.values().any(|existing| {
            existing.email.eq_ignore_ascii_case(&account.email)
                || (account.subject_id.is_some() && existing.subject_id == account.subject_id)
        });
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Account with this subject or email already exists"
            )));
        }
        accounts.insert(account.account_id, account.clone());
        Ok(())
    }

    async fn update(&self, account: &Account) -> Result<(), AppError> {
        let mut accounts = self.accounts.lock().map_err(poisoned)?;
        match accounts.get_mut(&account.account_id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!(
                "Account {} not found",
                account.account_id
            ))),
        }
    }

    async fn count(&self) -> Result<u64, AppError> {
        Ok(self.accounts.lock().map_err(poisoned)?.len() as u64)
    }

    async fn claim_bootstrap(&self) -> Result<bool, AppError> {
        Ok(self
            .bootstrap_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create(&self, session: &Session) -> Result<(), AppError> {
        if self.fail_session_writes.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "session store unavailable"
            )));
        }
        self.sessions
            .lock()
            .map_err(poisoned)?
            .insert(session.credential_hash.clone(), session.clone());
        Ok(())
    }

    async fn delete_by_hash(&self, credential_hash: &str) -> Result<u64, AppError> {
        let removed = self
            .sessions
            .lock()
            .map_err(poisoned)?
            .remove(credential_hash);
        Ok(u64::from(removed.is_some()))
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn insert(&self, entry: &AuditLogEntry) -> Result<(), AppError> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "audit store unavailable"
            )));
        }
        self.audit_logs.lock().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = InMemoryStore::new();
        AccountStore::create(
            &store,
            &Account::new("sub-1", "dup@example.com", "password", Role::User, false),
        )
        .await
        .unwrap();

        let err = AccountStore::create(
            &store,
            &Account::new("sub-2", "DUP@example.com", "password", Role::User, false),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_by_either_falls_back_to_email() {
        let store = InMemoryStore::new();
        let mut legacy = Account::new("unused", "legacy@example.com", "password", Role::User, true);
        legacy.subject_id = None;
        AccountStore::create(&store, &legacy).await.unwrap();

        let found = store
            .find_by_either("new-subject", "legacy@example.com")
            .await
            .unwrap();
        assert_eq!(found.map(|a| a.account_id), Some(legacy.account_id));
    }

    #[tokio::test]
    async fn bootstrap_can_only_be_claimed_once() {
        let store = InMemoryStore::new();
        assert!(store.claim_bootstrap().await.unwrap());
        assert!(!store.claim_bootstrap().await.unwrap());
    }
}
