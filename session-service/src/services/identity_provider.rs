//! Identity provider client.
//!
//! The provider issues short-lived identity tokens and seals them into
//! longer-lived session credentials. This service only ever verifies, seals
//! and revokes; it never issues tokens itself.

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::ProviderError;
use crate::config::ProviderConfig;

/// Sign-in provider label used when the claims carry none.
pub const DEFAULT_SIGN_IN_PROVIDER: &str = "password";

const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);
/// An unknown `kid` triggers at most one JWKS refetch per URL within this interval.
const JWKS_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a provider-issued identity token.
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<ProviderClaims, ProviderError>;

    /// Verify a sealed session credential previously minted by `seal_session_credential`.
    async fn verify_session_credential(
        &self,
        credential: &str,
        check_revoked: bool,
    ) -> Result<ProviderClaims, ProviderError>;

    /// Exchange a verified identity token for a session credential valid for `ttl`.
    async fn seal_session_credential(
        &self,
        token: &str,
        ttl: Duration,
    ) -> Result<String, ProviderError>;

    /// Invalidate every credential issued to `subject_id` so far.
    async fn revoke_all(&self, subject_id: &str) -> Result<(), ProviderError>;
}

/// Bound a provider call. An elapsed timer counts as an outage.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(timeout, call).await.map_err(|_| {
        ProviderError::Unavailable(anyhow::anyhow!(
            "identity provider did not answer within {}ms",
            timeout.as_millis()
        ))
    })?
}

/// Provider-specific sign-in details nested in the token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignInInfo {
    pub sign_in_provider: Option<String>,
}

/// Claims exactly as decoded from the wire. Nothing here is trusted to be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawClaims {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub auth_time: Option<i64>,
    pub iat: Option<i64>,
    #[serde(rename = "firebase")]
    pub sign_in: Option<SignInInfo>,
}

/// Validated claims.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderClaims {
    pub subject_id: String,
    pub email: String,
    pub email_verified: bool,
    pub sign_in_provider: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    /// Seconds since the epoch at which the user authenticated.
    pub auth_time: i64,
}

impl ProviderClaims {
    pub fn is_password_provider(&self) -> bool {
        self.sign_in_provider == DEFAULT_SIGN_IN_PROVIDER
    }
}

impl TryFrom<RawClaims> for ProviderClaims {
    type Error = ProviderError;

    fn try_from(raw: RawClaims) -> Result<Self, Self::Error> {
        let subject_id = raw
            .sub
            .filter(|s| !s.trim().is_empty())
            .ok_or(ProviderError::MissingClaim("sub"))?;
        let email = raw
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(ProviderError::MissingClaim("email"))?;
        let sign_in_provider = raw
            .sign_in
            .and_then(|info| info.sign_in_provider)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_SIGN_IN_PROVIDER.to_string());

        Ok(Self {
            subject_id,
            email,
            email_verified: raw.email_verified.unwrap_or(false),
            sign_in_provider,
            name: raw.name.filter(|n| !n.is_empty()),
            picture: raw.picture.filter(|p| !p.is_empty()),
            auth_time: raw.auth_time.or(raw.iat).unwrap_or(0),
        })
    }
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Provider client speaking the identity-toolkit REST API and verifying
/// RS256 tokens against the published key sets.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    jwks: RwLock<HashMap<String, CachedJwks>>,
    refetch: tokio::sync::Mutex<()>,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    valid_since: Option<String>,
    #[serde(default)]
    disabled: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCookieResponse {
    session_cookie: String,
}

impl HttpIdentityProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build identity provider client: {}", e))?;

        tracing::info!(project_id = %config.project_id, "Identity provider client initialized");

        Ok(Self {
            client,
            config,
            jwks: RwLock::new(HashMap::new()),
            refetch: tokio::sync::Mutex::new(()),
        })
    }

    fn project_url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/projects/{}{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.project_id,
            suffix
        )
    }

    async fn fetch_jwks(&self, url: &str) -> Result<JwkSet, ProviderError> {
        let keys = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::Unavailable(anyhow::anyhow!("JWKS fetch failed: {}", e)))?
            .json::<JwkSet>()
            .await
            .map_err(|e| ProviderError::Unavailable(anyhow::anyhow!("JWKS parse failed: {}", e)))?;

        self.jwks.write().await.insert(
            url.to_string(),
            CachedJwks {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(keys)
    }

    /// Answer from the cache when it can: a known key, or a recent fetch that lacked `kid`.
    async fn cached_key(&self, url: &str, kid: &str) -> Option<Result<DecodingKey, ProviderError>> {
        let cache = self.jwks.read().await;
        let cached = cache.get(url)?;
        let age = cached.fetched_at.elapsed();
        if age >= JWKS_CACHE_TTL {
            return None;
        }
        match cached.keys.find(kid) {
            Some(jwk) => {
                Some(DecodingKey::from_jwk(jwk).map_err(|e| ProviderError::InvalidToken(e.to_string())))
            }
            None if age < JWKS_MIN_REFETCH_INTERVAL => Some(Err(ProviderError::InvalidToken(
                "unknown signing key".to_string(),
            ))),
            None => None,
        }
    }

    async fn decoding_key(&self, url: &str, kid: &str) -> Result<DecodingKey, ProviderError> {
        if let Some(found) = self.cached_key(url, kid).await {
            return found;
        }

        // Unknown kid or stale cache: the provider may have rotated keys.
        // Refetches are serialized and the cache is rechecked once the lock is held.
        let _refetch = self.refetch.lock().await;
        if let Some(found) = self.cached_key(url, kid).await {
            return found;
        }

        let keys = self.fetch_jwks(url).await?;
        let jwk = keys
            .find(kid)
            .ok_or_else(|| ProviderError::InvalidToken("unknown signing key".to_string()))?;
        DecodingKey::from_jwk(jwk).map_err(|e| ProviderError::InvalidToken(e.to_string()))
    }

    async fn verify_jwt(
        &self,
        token: &str,
        issuer: &str,
        jwks_url: &str,
        check_revoked: bool,
    ) -> Result<ProviderClaims, ProviderError> {
        let header =
            decode_header(token).map_err(|e| ProviderError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::InvalidToken("missing key id".to_string()))?;
        let key = self.decoding_key(jwks_url, &kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.config.project_id.as_str()]);
        validation.set_issuer(&[issuer]);

        let raw = decode::<RawClaims>(token, &key, &validation)
            .map_err(|e| ProviderError::InvalidToken(e.to_string()))?
            .claims;
        let claims = ProviderClaims::try_from(raw)?;

        if check_revoked {
            self.check_revoked(&claims).await?;
        }
        Ok(claims)
    }

    async fn check_revoked(&self, claims: &ProviderClaims) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.project_url("/accounts:lookup"))
            .bearer_auth(&self.config.service_token)
            .json(&serde_json::json!({ "localId": [claims.subject_id] }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::Unavailable(anyhow::anyhow!("Account lookup failed: {}", e)))?
            .json::<LookupResponse>()
            .await
            .map_err(|e| {
                ProviderError::Unavailable(anyhow::anyhow!("Account lookup parse failed: {}", e))
            })?;

        let user = response.users.into_iter().next().ok_or(ProviderError::Revoked)?;
        if user.disabled {
            return Err(ProviderError::Revoked);
        }
        let valid_since = user
            .valid_since
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        if claims.auth_time < valid_since {
            return Err(ProviderError::Revoked);
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<ProviderClaims, ProviderError> {
        self.verify_jwt(
            token,
            &self.config.id_token_issuer,
            &self.config.id_token_jwks_url,
            check_revoked,
        )
        .await
    }

    async fn verify_session_credential(
        &self,
        credential: &str,
        check_revoked: bool,
    ) -> Result<ProviderClaims, ProviderError> {
        self.verify_jwt(
            credential,
            &self.config.session_issuer,
            &self.config.session_jwks_url,
            check_revoked,
        )
        .await
    }

    async fn seal_session_credential(
        &self,
        token: &str,
        ttl: Duration,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.project_url(":createSessionCookie"))
            .bearer_auth(&self.config.service_token)
            .json(&serde_json::json!({
                "idToken": token,
                "validDuration": ttl.as_secs().to_string(),
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(anyhow::anyhow!("Seal request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(anyhow::anyhow!(
                "Seal request returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Seal(format!("provider returned {}", status)));
        }

        response
            .json::<SessionCookieResponse>()
            .await
            .map(|r| r.session_cookie)
            .map_err(|e| ProviderError::Seal(e.to_string()))
    }

    async fn revoke_all(&self, subject_id: &str) -> Result<(), ProviderError> {
        let now = chrono::Utc::now().timestamp();
        self.client
            .post(self.project_url("/accounts:update"))
            .bearer_auth(&self.config.service_token)
            .json(&serde_json::json!({
                "localId": subject_id,
                "validSince": now.to_string(),
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::Unavailable(anyhow::anyhow!("Revoke failed: {}", e)))?;

        tracing::info!(subject_id = %subject_id, "Revoked provider credentials");
        Ok(())
    }
}

struct IssuedCredential {
    claims: RawClaims,
    serial: u64,
}

/// In-process provider for tests and local development.
///
/// Each issued token or credential gets a serial number; `revoke_all` records
/// the current serial for the subject and everything issued at or before it
/// fails a revocation-checked verification.
#[derive(Default)]
pub struct MockIdentityProvider {
    tokens: Mutex<HashMap<String, IssuedCredential>>,
    sessions: Mutex<HashMap<String, IssuedCredential>>,
    revoked_through: Mutex<HashMap<String, u64>>,
    revoke_calls: Mutex<Vec<String>>,
    serial: AtomicU64,
    unavailable: AtomicBool,
    fail_seal: AtomicBool,
    fail_revoke: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

fn mock_poisoned(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Unavailable(anyhow::anyhow!("Mock provider mutex poisoned: {}", e))
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims for a typical sign-in.
    pub fn claims(subject_id: &str, email: &str, provider: &str, email_verified: bool) -> RawClaims {
        RawClaims {
            sub: Some(subject_id.to_string()),
            email: Some(email.to_string()),
            email_verified: Some(email_verified),
            name: None,
            picture: None,
            auth_time: Some(chrono::Utc::now().timestamp()),
            iat: None,
            sign_in: Some(SignInInfo {
                sign_in_provider: Some(provider.to_string()),
            }),
        }
    }

    /// Issue an identity token carrying `claims`.
    pub fn issue_token(&self, claims: RawClaims) -> String {
        let token = format!("id-token-{}", Uuid::new_v4());
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(token.clone(), IssuedCredential { claims, serial });
        }
        token
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_fail_seal(&self, fail: bool) {
        self.fail_seal.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_revoke(&self, fail: bool) {
        self.fail_revoke.store(fail, Ordering::SeqCst);
    }

    /// Delay every call, to exercise caller timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut current) = self.delay.lock() {
            *current = delay;
        }
    }

    /// Subjects passed to `revoke_all`, in call order.
    pub fn revoke_calls(&self) -> Vec<String> {
        self.revoke_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    async fn simulate_network(&self) -> Result<(), ProviderError> {
        let delay = *self.delay.lock().map_err(mock_poisoned)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable(anyhow::anyhow!(
                "identity provider unreachable"
            )));
        }
        Ok(())
    }

    fn verify_in(
        &self,
        store: &Mutex<HashMap<String, IssuedCredential>>,
        value: &str,
        check_revoked: bool,
    ) -> Result<ProviderClaims, ProviderError> {
        let (raw, serial) = {
            let issued = store.lock().map_err(mock_poisoned)?;
            let entry = issued
                .get(value)
                .ok_or_else(|| ProviderError::InvalidToken("unknown credential".to_string()))?;
            (entry.claims.clone(), entry.serial)
        };
        let claims = ProviderClaims::try_from(raw)?;

        if check_revoked {
            let revoked = self.revoked_through.lock().map_err(mock_poisoned)?;
            if revoked
                .get(&claims.subject_id)
                .is_some_and(|through| serial <= *through)
            {
                return Err(ProviderError::Revoked);
            }
        }
        Ok(claims)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<ProviderClaims, ProviderError> {
        self.simulate_network().await?;
        self.verify_in(&self.tokens, token, check_revoked)
    }

    async fn verify_session_credential(
        &self,
        credential: &str,
        check_revoked: bool,
    ) -> Result<ProviderClaims, ProviderError> {
        self.simulate_network().await?;
        self.verify_in(&self.sessions, credential, check_revoked)
    }

    async fn seal_session_credential(
        &self,
        token: &str,
        _ttl: Duration,
    ) -> Result<String, ProviderError> {
        self.simulate_network().await?;
        if self.fail_seal.load(Ordering::SeqCst) {
            return Err(ProviderError::Seal("sealing disabled".to_string()));
        }
        self.verify_in(&self.tokens, token, true)?;

        let claims = self
            .tokens
            .lock()
            .map_err(mock_poisoned)?
            .get(token)
            .map(|issued| issued.claims.clone())
            .ok_or_else(|| ProviderError::InvalidToken("unknown credential".to_string()))?;

        let credential = format!("session-{}", Uuid::new_v4());
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions
            .lock()
            .map_err(mock_poisoned)?
            .insert(credential.clone(), IssuedCredential { claims, serial });
        Ok(credential)
    }

    async fn revoke_all(&self, subject_id: &str) -> Result<(), ProviderError> {
        self.simulate_network().await?;
        self.revoke_calls
            .lock()
            .map_err(mock_poisoned)?
            .push(subject_id.to_string());
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable(anyhow::anyhow!(
                "revocation endpoint unavailable"
            )));
        }
        let current = self.serial.load(Ordering::SeqCst);
        self.revoked_through
            .lock()
            .map_err(mock_poisoned)?
            .insert(subject_id.to_string(), current);
        Ok(())
    }
}
