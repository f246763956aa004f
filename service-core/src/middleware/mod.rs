pub mod error_details;
pub mod rate_limit;
pub mod security_headers;
pub mod tracing;
