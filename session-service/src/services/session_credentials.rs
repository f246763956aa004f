//! Session credential lifecycle: mint, persist, transport and revoke.

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::audit::RequestMeta;
use super::error::AuthError;
use super::identity_provider::{with_timeout, IdentityProvider};
use super::store::SessionStore;
use crate::config::CookieConfig;
use crate::models::Session;

/// A freshly sealed session credential. `value` is the only copy of the raw credential.
#[derive(Debug, Clone)]
pub struct SessionCredential {
    pub value: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

/// What a revoke actually managed to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevokeOutcome {
    pub subject_id: Option<String>,
    pub provider_revoked: bool,
    pub sessions_deleted: u64,
}

/// SHA-256 hex digest of a raw session credential.
pub fn hash_credential(credential: &str) -> String {
    hex::encode(Sha256::digest(credential.as_bytes()))
}

#[derive(Clone)]
pub struct SessionCredentialManager {
    provider: Arc<dyn IdentityProvider>,
    sessions: Arc<dyn SessionStore>,
    cookie: CookieConfig,
    provider_timeout: Duration,
}

impl SessionCredentialManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<dyn SessionStore>,
        cookie: CookieConfig,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            sessions,
            cookie,
            provider_timeout,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie.name
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.cookie.ttl_days)
    }

    /// Exchange a verified identity token for a sealed session credential.
    pub async fn mint(&self, token: &str) -> Result<SessionCredential, AuthError> {
        let ttl = self.ttl();
        let ttl_std = ttl
            .to_std()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("invalid session ttl: {}", e)))?;

        let value = with_timeout(
            self.provider_timeout,
            self.provider.seal_session_credential(token, ttl_std),
        )
        .await?;

        Ok(SessionCredential {
            hash: hash_credential(&value),
            value,
            expires_at: Utc::now() + ttl,
        })
    }

    /// Record the session server-side. Only the credential hash is stored.
    pub async fn persist(
        &self,
        account_id: Uuid,
        credential: &SessionCredential,
        request: &RequestMeta,
    ) -> Result<Session, AuthError> {
        let mut session = Session::new(
            account_id,
            credential.hash.clone(),
            self.ttl(),
            request.ip.clone(),
            request.user_agent.clone(),
        );
        session.expiry_utc = credential.expires_at;
        self.sessions.create(&session).await?;
        Ok(session)
    }

    /// Drop the local row for a credential being replaced. The provider side
    /// is left alone so the replacement stays valid.
    pub async fn forget(&self, credential: &str) -> Result<u64, AuthError> {
        Ok(self
            .sessions
            .delete_by_hash(&hash_credential(credential))
            .await?)
    }

    /// The transport cookie carrying `credential`.
    pub fn to_cookie(&self, credential: &SessionCredential) -> Cookie<'static> {
        let max_age = (credential.expires_at - Utc::now()).num_seconds().max(0);
        let mut cookie = self.base_cookie(credential.value.clone());
        cookie.set_max_age(time::Duration::seconds(max_age));
        cookie
    }

    /// A cookie that makes browsers drop the session cookie. Name, domain and
    /// path must match the original exactly.
    pub fn clear_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.base_cookie(String::new());
        cookie.set_max_age(time::Duration::ZERO);
        cookie.set_expires(time::OffsetDateTime::UNIX_EPOCH);
        cookie
    }

    fn base_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.cookie.name.clone(), value))
            .http_only(true)
            .secure(true)
            .same_site(SameSite::None)
            .path("/")
            .domain(self.cookie.domain.clone())
            .build()
    }

    /// Pull the session credential out of a raw `Cookie` header.
    pub fn parse_cookie_header(&self, header: &str) -> Option<String> {
        Cookie::split_parse(header)
            .filter_map(Result::ok)
            .find(|c| c.name() == self.cookie.name && !c.value().is_empty())
            .map(|c| c.value().to_string())
    }

    /// Best-effort revoke: provider-side refresh capability and the local row.
    /// Failures are logged; the caller clears the cookie regardless.
    pub async fn revoke(&self, credential: &str) -> RevokeOutcome {
        let mut outcome = RevokeOutcome::default();

        match with_timeout(
            self.provider_timeout,
            self.provider.verify_session_credential(credential, false),
        )
        .await
        {
            Ok(claims) => {
                match with_timeout(
                    self.provider_timeout,
                    self.provider.revoke_all(&claims.subject_id),
                )
                .await
                {
                    Ok(()) => outcome.provider_revoked = true,
                    Err(e) => {
                        tracing::warn!(error = %e, "Provider revoke failed");
                    }
                }
                outcome.subject_id = Some(claims.subject_id);
            }
            Err(e) => {
                tracing::info!(error = %e, "Session credential not verifiable during revoke");
            }
        }

        match self.sessions.delete_by_hash(&hash_credential(credential)).await {
            Ok(deleted) => outcome.sessions_deleted = deleted,
            Err(e) => tracing::error!(error = %e, "Failed to delete session row"),
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identity_provider::MockIdentityProvider;
    use crate::services::store::InMemoryStore;

    fn manager(provider: Arc<MockIdentityProvider>, store: Arc<InMemoryStore>) -> SessionCredentialManager {
        SessionCredentialManager::new(
            provider,
            store,
            CookieConfig {
                name: "__Secure-acme_session".to_string(),
                domain: ".acme.example".to_string(),
                ttl_days: 5,
                signing_secret: None,
            },
            Duration::from_secs(1),
        )
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_credential("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn cookie_carries_cross_site_attributes() {
        let provider = Arc::new(MockIdentityProvider::new());
        let store = Arc::new(InMemoryStore::new());
        let manager = manager(provider.clone(), store);
        let token = provider.issue_token(MockIdentityProvider::claims(
            "sub-1",
            "a@example.com",
            "google.com",
            true,
        ));

        let credential = manager.mint(&token).await.unwrap();
        let cookie = manager.to_cookie(&credential);

        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("acme.example"));
        let max_age = cookie.max_age().unwrap().whole_seconds();
        assert!(max_age > 5 * 86_400 - 60 && max_age <= 5 * 86_400);

        let cleared = manager.clear_cookie();
        assert_eq!(cleared.name(), cookie.name());
        assert_eq!(cleared.domain(), cookie.domain());
        assert_eq!(cleared.path(), cookie.path());
        assert_eq!(cleared.max_age(), Some(time::Duration::ZERO));
    }

    #[tokio::test]
    async fn minted_credential_round_trips_through_cookie() {
        let provider = Arc::new(MockIdentityProvider::new());
        let store = Arc::new(InMemoryStore::new());
        let manager = manager(provider.clone(), store);
        let token = provider.issue_token(MockIdentityProvider::claims(
            "sub-42",
            "rt@example.com",
            "google.com",
            true,
        ));

        let credential = manager.mint(&token).await.unwrap();
        let header = format!("theme=dark; {}", manager.to_cookie(&credential).stripped());
        let parsed = manager.parse_cookie_header(&header).unwrap();

        let claims = provider.verify_session_credential(&parsed, true).await.unwrap();
        assert_eq!(claims.subject_id, "sub-42");
    }

    #[tokio::test]
    async fn revoke_kills_provider_and_local_session() {
        let provider = Arc::new(MockIdentityProvider::new());
        let store = Arc::new(InMemoryStore::new());
        let manager = manager(provider.clone(), store.clone());
        let token = provider.issue_token(MockIdentityProvider::claims(
            "sub-7",
            "r@example.com",
            "google.com",
            true,
        ));
        let credential = manager.mint(&token).await.unwrap();
        manager
            .persist(Uuid::new_v4(), &credential, &RequestMeta::default())
            .await
            .unwrap();
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.sessions()[0].credential_hash, credential.hash);

        let outcome = manager.revoke(&credential.value).await;
        assert_eq!(
            outcome,
            RevokeOutcome {
                subject_id: Some("sub-7".to_string()),
                provider_revoked: true,
                sessions_deleted: 1,
            }
        );
        assert!(store.sessions().is_empty());
        assert!(provider
            .verify_session_credential(&credential.value, true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn revoke_still_deletes_row_when_provider_fails() {
        let provider = Arc::new(MockIdentityProvider::new());
        let store = Arc::new(InMemoryStore::new());
        let manager = manager(provider.clone(), store.clone());
        let token = provider.issue_token(MockIdentityProvider::claims(
            "sub-8",
            "f@example.com",
            "google.com",
            true,
        ));
        let credential = manager.mint(&token).await.unwrap();
        manager
            .persist(Uuid::new_v4(), &credential, &RequestMeta::default())
            .await
            .unwrap();

        provider.set_fail_revoke(true);
        let outcome = manager.revoke(&credential.value).await;
        assert!(!outcome.provider_revoked);
        assert_eq!(outcome.sessions_deleted, 1);
    }
}
