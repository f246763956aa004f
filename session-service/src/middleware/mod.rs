pub mod auth;
pub mod origin;
pub mod rate_limit;

pub use auth::{auth_middleware, require_role, AuthUser, AuthenticatedUser};
pub use origin::{cors_layer, origin_guard, OriginPolicy};
pub use rate_limit::rate_limit_middleware;
