pub mod audit;
pub mod auth;
pub mod payload;
pub mod tenant;

pub use audit::audit_middleware;
pub use auth::{auth_middleware, request_metadata};
pub use payload::capture_payload_middleware;
pub use tenant::tenant_guard_middleware;
