use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{Principal, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "suspended" => Ok(UserStatus::Suspended),
            _ => Err(format!("Invalid user status: {}", s)),
        }
    }
}

/// Credential record the issuer authenticates against.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub status: UserStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(
        organization_id: Uuid,
        email: String,
        password_hash: String,
        first_name: String,
        last_name: String,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            email: email.trim().to_lowercase(),
            password_hash,
            first_name,
            last_name,
            role,
            status: UserStatus::Active,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            organization_id: self.organization_id,
            role: self.role,
            email: self.email.clone(),
        }
    }
}

/// Decode a TEXT code column through its `FromStr` impl.
pub(crate) fn decode_code<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

impl<'r> FromRow<'r, PgRow> for UserAccount {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            role: decode_code(row, "role")?,
            status: decode_code(row, "status")?,
            last_login_at: row.try_get("last_login_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_is_active_with_normalized_email() {
        let account = UserAccount::new(
            Uuid::new_v4(),
            "  Coach@Club.TEST ".to_string(),
            "hash".to_string(),
            "Ada".to_string(),
            "Lovelace".to_string(),
            Role::Coach,
        );
        assert_eq!(account.email, "coach@club.test");
        assert!(account.is_active());
        assert!(account.last_login_at.is_none());
    }

    #[test]
    fn principal_snapshots_identity() {
        let account = UserAccount::new(
            Uuid::new_v4(),
            "admin@club.test".to_string(),
            "hash".to_string(),
            "A".to_string(),
            "B".to_string(),
            Role::Admin,
        );
        let principal = account.principal();
        assert_eq!(principal.id, account.id);
        assert_eq!(principal.organization_id, account.organization_id);
        assert_eq!(principal.role, Role::Admin);
    }
}
