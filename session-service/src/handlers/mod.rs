pub mod health;
pub mod session;
pub mod user;

use service_core::axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

use crate::services::RequestMeta;
use crate::AppState;

pub use health::health_check;
pub use session::{create_session, login, logout, signup};
pub use user::get_me;

#[axum::async_trait]
impl FromRequestParts<AppState> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(RequestMeta::from_http(
            &parts.method,
            &parts.uri,
            &parts.headers,
            &parts.extensions,
            state.config.rate_limit.trust_forwarded_for,
        ))
    }
}
