use serde::{Deserialize, Serialize};

use crate::types::{Email, Role, UserId};

/// Persisted representation of an account in SurrealDB.
///
/// Only the fields this crate reads are declared; timestamps and record ids
/// are left to the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Canonical integer identifier (the token `sub`).
    pub uid: i64,
    /// Unique account email, compared exactly as stored.
    pub email: String,
    /// Argon2 PHC string. `None` for accounts provisioned through OAuth.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub bio: Option<String>,
    /// Populated only when `Association::Skills` was requested.
    #[serde(default)]
    pub skills: Vec<SkillRecord>,
    /// Populated only when `Association::Causes` was requested.
    #[serde(default)]
    pub causes: Vec<CauseRecord>,
}

impl UserRecord {
    pub fn id(&self) -> UserId {
        UserId::new(self.uid)
    }

    /// Whether this account can sign in with a local password.
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Payload used when inserting a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: Email,
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
}

impl NewUser {
    /// An account with no local password and the lowest-privilege role.
    pub fn external(email: Email, first_name: String, last_name: String) -> Self {
        Self {
            email,
            password_hash: None,
            first_name,
            last_name,
            avatar_url: None,
            role: Role::Volunteer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseRecord {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Nested collections a caller may ask to load alongside an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Association {
    Skills,
    Causes,
}

impl Association {
    /// Field name on the `user` table holding the record links.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Skills => "skills",
            Self::Causes => "causes",
        }
    }

    /// Every association an account has.
    pub fn all() -> Vec<Association> {
        vec![Self::Skills, Self::Causes]
    }
}
