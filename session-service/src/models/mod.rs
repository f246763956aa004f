//! Domain models for session-service.

pub mod account;
pub mod audit_log;
pub mod session;

pub use account::{Account, AccountStatus, Role};
pub use audit_log::{AuditAction, AuditLogEntry, Severity};
pub use session::Session;
