//! Services layer: credential lifecycle, tenant isolation, audit capture and the
//! stores behind them.

pub mod audit;
pub mod credentials;
mod database;
pub mod error;
mod jwt;
pub mod memory;
pub mod stores;
pub mod tenant;

pub use audit::{AuditCapture, AuditOutcome, AuditRecorder, RequestMetadata};
pub use credentials::{CredentialIssuer, NewAccount, TokenResponse};
pub use database::Database;
pub use error::CredentialError;
pub use jwt::{AccessTokenClaims, JwtService};
pub use memory::InMemoryStore;
pub use stores::{AuditLogStore, RefreshRedemption, RefreshTokenStore, UserStore};
pub use tenant::{
    check_tenant_access, resolve_tenant_context, PayloadLocation, RequestPayload, TenantError,
    TenantScopedRequest,
};
