use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::ErrorDetails;

/// Rewrite error bodies to include their internal details.
///
/// Install with the environment's flag as state; only development routers pass `true`.
pub async fn error_details_middleware(
    State(expose): State<bool>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let Some(ErrorDetails(body)) = response.extensions_mut().remove::<ErrorDetails>() else {
        return response;
    };
    if !expose {
        return response;
    }

    let bytes = match serde_json::to_vec(&body) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize error details");
            return response;
        }
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}
