use service_core::axum::Json;

use crate::middleware::{AuthUser, AuthenticatedUser};

/// Current user: the local account merged with provider profile fields.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Authenticated user", body = AuthenticatedUser),
        (status = 401, description = "No or invalid session", body = ErrorResponse),
        (status = 403, description = "Account missing or inactive", body = ErrorResponse)
    ),
    tag = "User",
    security(("session_cookie" = []))
)]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<AuthenticatedUser> {
    Json(user)
}
