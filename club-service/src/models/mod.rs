pub mod audit_entry;
pub mod principal;
pub mod refresh_token;
pub mod user;

pub use audit_entry::{AuditAction, AuditEntry, AuditFilter, AuditStats};
pub use principal::{Principal, Role};
pub use refresh_token::{ClientInfo, RefreshToken};
pub use user::{UserAccount, UserStatus};
