pub mod password;
pub mod redaction;
pub mod validation;

pub use password::{hash_password, verify_against_dummy, verify_password, Password, PasswordHashString};
pub use redaction::{redact, redact_value, REDACTION_MARKER};
pub use validation::ValidatedJson;
