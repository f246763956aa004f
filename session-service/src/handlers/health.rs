use service_core::axum::{extract::State, Json};

use crate::dtos::session::HealthResponse;
use crate::services::AuthError;
use crate::AppState;

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = ErrorResponse)
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AuthError> {
    state.accounts.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Account store health check failed");
        AuthError::DependencyUnavailable(anyhow::anyhow!(e.to_string()))
    })?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
    }))
}
