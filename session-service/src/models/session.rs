//! Session model - server-side record of an issued session credential.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Session entity. Only the SHA-256 of the credential is kept.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub account_id: Uuid,
    pub credential_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        account_id: Uuid,
        credential_hash: String,
        ttl: Duration,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            account_id,
            credential_hash,
            ip_address,
            user_agent,
            created_utc: now,
            expiry_utc: now + ttl,
            revoked_utc: None,
        }
    }

    /// Local expiry is advisory; the provider's revocation check is authoritative.
    pub fn is_expired(&self) -> bool {
        self.expiry_utc <= Utc::now()
    }
}
