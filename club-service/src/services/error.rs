use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Invalid credentials")]
    AuthFailed,

    #[error("Refresh token not recognized")]
    TokenInvalid,

    #[error("Refresh token revoked")]
    TokenRevoked,

    #[error("Refresh token expired")]
    TokenExpired,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl CredentialError {
    /// Label for `auth_failures_total{reason}` and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            CredentialError::AuthFailed => "auth_failed",
            CredentialError::TokenInvalid => "token_invalid",
            CredentialError::TokenRevoked => "token_revoked",
            CredentialError::TokenExpired => "token_expired",
            CredentialError::EmailAlreadyRegistered => "email_taken",
            CredentialError::Internal(_) | CredentialError::Store(_) => "internal",
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            // One indistinguishable body for every credential rejection.
            CredentialError::AuthFailed
            | CredentialError::TokenInvalid
            | CredentialError::TokenRevoked
            | CredentialError::TokenExpired => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            CredentialError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            CredentialError::Internal(e) => AppError::InternalError(e),
            CredentialError::Store(e) => e,
        }
    }
}
