pub mod session;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Invalid or expired session")]
    pub error: String,
    #[schema(example = "INVALID_SESSION")]
    pub code: Option<String>,
}
