//! Identity resolution: provider claims merged with the local account record.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::audit::{AuditEvent, AuditRecorder, RequestMeta};
use super::error::AuthError;
use super::identity_provider::{with_timeout, IdentityProvider, ProviderClaims};
use super::store::AccountStore;
use crate::config::AccountPolicyConfig;
use crate::models::{Account, AuditAction, Role, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Identity token exchange; the account must already exist unless the
    /// provider auto-provisions.
    Login,
    /// Identity token exchange; the account must not exist yet.
    Signup,
    /// Session credential check on a protected request. Never creates or mutates.
    SessionCheck,
    /// Identity token exchange that creates the account when absent.
    Exchange,
}

impl ResolveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveMode::Login => "login",
            ResolveMode::Signup => "signup",
            ResolveMode::SessionCheck => "session_check",
            ResolveMode::Exchange => "exchange",
        }
    }

    fn success_action(&self, created: bool) -> AuditAction {
        match self {
            ResolveMode::Signup => AuditAction::UserSignup,
            ResolveMode::Exchange if created => AuditAction::UserSignup,
            _ => AuditAction::UserLogin,
        }
    }

    fn failure_action(&self) -> AuditAction {
        match self {
            ResolveMode::Signup => AuditAction::UserSignupFailed,
            _ => AuditAction::UserLoginFailed,
        }
    }
}

/// Account policy knobs for the resolver.
#[derive(Debug, Clone)]
pub struct ResolverPolicy {
    pub auto_provision_providers: Vec<String>,
    pub default_approved: bool,
    pub provider_timeout: Duration,
}

impl ResolverPolicy {
    pub fn new(accounts: &AccountPolicyConfig, provider_timeout: Duration) -> Self {
        Self {
            auto_provision_providers: accounts.auto_provision_providers.clone(),
            default_approved: accounts.default_approved,
            provider_timeout,
        }
    }

    fn auto_provisions(&self, provider: &str) -> bool {
        self.auto_provision_providers
            .iter()
            .any(|p| p.eq_ignore_ascii_case(provider))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub account: Account,
    pub claims: ProviderClaims,
    pub created: bool,
    /// Password signup whose email still needs verifying. No session may be issued.
    pub pending_verification: bool,
}

impl ResolvedIdentity {
    /// Local display name, falling back to the provider's.
    pub fn display_name(&self) -> Option<&str> {
        self.account
            .display_name
            .as_deref()
            .or(self.claims.name.as_deref())
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.account
            .avatar_url
            .as_deref()
            .or(self.claims.picture.as_deref())
    }

    /// Audit entry for a completed exchange. Written by the caller once the
    /// session is issued, or once the signup is parked pending verification.
    pub fn success_event(&self, mode: ResolveMode) -> AuditEvent {
        AuditEvent::new(mode.success_action(self.created))
            .account(self.account.account_id)
            .meta("provider", self.claims.sign_in_provider.as_str())
            .meta("created", self.created)
            .meta("pending_verification", self.pending_verification)
            .meta("mode", mode.as_str())
    }
}

/// What the audit entry for an attempt can say about it.
#[derive(Default)]
struct Attempt {
    account_id: Option<Uuid>,
    provider: Option<String>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    accounts: Arc<dyn AccountStore>,
    audit: AuditRecorder,
    policy: ResolverPolicy,
}

impl IdentityResolver {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        accounts: Arc<dyn AccountStore>,
        audit: AuditRecorder,
        policy: ResolverPolicy,
    ) -> Self {
        Self {
            provider,
            accounts,
            audit,
            policy,
        }
    }

    /// Resolve `token` into an identity.
    ///
    /// Exchange modes audit a failure here, once. A success is not audited
    /// until the caller knows whether a session came of it; see
    /// [`ResolvedIdentity::success_event`]. `SessionCheck` leaves all auditing
    /// to the caller.
    pub async fn resolve(
        &self,
        token: &str,
        mode: ResolveMode,
        request: &RequestMeta,
    ) -> Result<ResolvedIdentity, AuthError> {
        let mut attempt = Attempt::default();
        let result = self.resolve_inner(token, mode, &mut attempt).await;

        if mode != ResolveMode::SessionCheck {
            if let Err(e) = &result {
                let mut event = AuditEvent::new(mode.failure_action())
                    .maybe_account(attempt.account_id)
                    .reason(e.reason())
                    .severity(Severity::Warn);
                if let Some(provider) = &attempt.provider {
                    event = event.meta("provider", provider.as_str());
                }
                self.audit
                    .record(event.request(request).meta("mode", mode.as_str()));
            }
        }

        result
    }

    async fn verify(&self, token: &str, mode: ResolveMode) -> Result<ProviderClaims, AuthError> {
        let timeout = self.policy.provider_timeout;
        let claims = match mode {
            ResolveMode::SessionCheck => {
                with_timeout(timeout, self.provider.verify_session_credential(token, true)).await
            }
            _ => with_timeout(timeout, self.provider.verify_token(token, true)).await,
        }?;
        Ok(claims)
    }

    async fn resolve_inner(
        &self,
        token: &str,
        mode: ResolveMode,
        attempt: &mut Attempt,
    ) -> Result<ResolvedIdentity, AuthError> {
        let claims = self.verify(token, mode).await?;
        attempt.provider = Some(claims.sign_in_provider.clone());

        // An email match only counts while the account has no other linked subject.
        let existing = self
            .accounts
            .find_by_either(&claims.subject_id, &claims.email)
            .await?
            .filter(|a| {
                a.subject_id
                    .as_deref()
                    .map_or(true, |subject| subject == claims.subject_id)
            });
        attempt.account_id = existing.as_ref().map(|a| a.account_id);

        if mode == ResolveMode::SessionCheck {
            let account = existing.ok_or(AuthError::AccountNotFound {
                session_check: true,
            })?;
            if !account.is_active() {
                return Err(AuthError::AccountInactive {
                    account_id: account.account_id,
                    status: account.status,
                });
            }
            return Ok(ResolvedIdentity {
                account,
                claims,
                created: false,
                pending_verification: false,
            });
        }

        let (mut account, created) = match (mode, existing) {
            (ResolveMode::Signup, Some(_)) => return Err(AuthError::AccountExists),
            (ResolveMode::Login, None) if !self.policy.auto_provisions(&claims.sign_in_provider) => {
                return Err(AuthError::AccountNotFound {
                    session_check: false,
                })
            }
            (_, Some(account)) => (account, false),
            (_, None) => (self.new_account(&claims).await?, true),
        };
        attempt.account_id = Some(account.account_id);

        if !account.is_active() {
            return Err(AuthError::AccountInactive {
                account_id: account.account_id,
                status: account.status,
            });
        }

        let unverified =
            claims.is_password_provider() && !claims.email_verified && !account.email_verified;
        if unverified && !created {
            return Err(AuthError::EmailNotVerified);
        }

        if account.subject_id.is_none() {
            tracing::info!(account_id = %account.account_id, "Linking account to provider subject");
            account.subject_id = Some(claims.subject_id.clone());
        }

        let now = Utc::now();
        if !unverified {
            if claims.email_verified || account.email_verified {
                account.record_verified_login(now);
            } else {
                account.last_login_utc = Some(now);
                account.updated_utc = now;
            }
        }

        if created {
            self.accounts.create(&account).await?;
            tracing::info!(
                account_id = %account.account_id,
                role = %account.role,
                provider = %claims.sign_in_provider,
                "Account created"
            );
        } else {
            self.accounts.update(&account).await?;
        }

        Ok(ResolvedIdentity {
            account,
            claims,
            created,
            pending_verification: unverified,
        })
    }

    /// Build (not persist) a new account, applying the bootstrap rule.
    async fn new_account(&self, claims: &ProviderClaims) -> Result<Account, AuthError> {
        let bootstrap =
            self.accounts.count().await? == 0 && self.accounts.claim_bootstrap().await?;

        let (role, is_approved) = if bootstrap {
            tracing::warn!(email = %claims.email, "Bootstrap: first account becomes ADMIN");
            (Role::Admin, true)
        } else if self.policy.auto_provisions(&claims.sign_in_provider) {
            (Role::User, true)
        } else {
            (Role::User, self.policy.default_approved)
        };

        let mut account = Account::new(
            claims.subject_id.clone(),
            claims.email.clone(),
            claims.sign_in_provider.clone(),
            role,
            is_approved,
        );
        account.display_name = claims.name.clone();
        account.avatar_url = claims.picture.clone();
        Ok(account)
    }
}
