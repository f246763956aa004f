//! Services layer for session-service.
//!
//! Stores, the identity-provider client, and the components that make up the
//! authentication pipeline.

pub mod audit;
mod database;
pub mod error;
pub mod identity;
pub mod identity_provider;
pub mod session_credentials;
pub mod store;

pub use audit::{AuditEvent, AuditRecorder, RequestMeta};
pub use database::Database;
pub use error::{AuthError, ProviderError};
pub use identity::{IdentityResolver, ResolveMode, ResolvedIdentity, ResolverPolicy};
pub use identity_provider::{
    HttpIdentityProvider, IdentityProvider, MockIdentityProvider, ProviderClaims, RawClaims,
};
pub use session_credentials::{
    hash_credential, RevokeOutcome, SessionCredential, SessionCredentialManager,
};
pub use store::{AccountStore, AuditStore, InMemoryStore, SessionStore};
