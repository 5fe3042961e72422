//! Password accounts: signup and login.

use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use crate::auth::credentials::{self, CredentialError};
use crate::auth::token::{TokenError, TokenService};
use crate::auth::user_store::{StoreError, UserDirectory};
use crate::db::schema::{CauseRecord, NewUser, SkillRecord, UserRecord};
use crate::types::{Email, Role};

/// Signup request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupInput {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Requested role. Defaults to `VOLUNTEER`.
    #[serde(default)]
    pub role: Option<Role>,
}

/// Login request body.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// Public view of an account. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub bio: Option<String>,
    pub skills: Vec<SkillRecord>,
    pub causes: Vec<CauseRecord>,
}

impl From<&UserRecord> for UserProfile {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.uid,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            avatar_url: user.avatar_url.clone(),
            role: user.role,
            bio: user.bio.clone(),
            skills: user.skills.clone(),
            causes: user.causes.clone(),
        }
    }
}

/// Token plus the account it was issued for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone)]
pub enum AccountError {
    /// Unknown email, wrong password, or an account without a password.
    InvalidCredentials,
    EmailTaken,
    InvalidInput(String),
    Credential(CredentialError),
    Token(TokenError),
    Store(StoreError),
}

impl fmt::Display for AccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::EmailTaken => write!(f, "An account with this email already exists"),
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Self::Credential(e) => write!(f, "{}", e),
            Self::Token(e) => write!(f, "{}", e),
            Self::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AccountError {}

impl AccountError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::EmailTaken => StatusCode::CONFLICT,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Credential(_) | Self::Token(_) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Account operation failed");
            "Internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<CredentialError> for AccountError {
    fn from(e: CredentialError) -> Self {
        Self::Credential(e)
    }
}

impl From<TokenError> for AccountError {
    fn from(e: TokenError) -> Self {
        Self::Token(e)
    }
}

impl From<StoreError> for AccountError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate { .. } => Self::EmailTaken,
            other => Self::Store(other),
        }
    }
}

/// Signup and password login on top of a [`UserDirectory`].
pub struct AccountService {
    tokens: Arc<TokenService>,
    directory: Arc<dyn UserDirectory>,
}

impl AccountService {
    pub fn new(tokens: Arc<TokenService>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { tokens, directory }
    }

    /// Create a password account and sign it in.
    ///
    /// `PLATFORM_ADMIN` cannot be self-assigned.
    pub async fn signup(&self, input: SignupInput) -> Result<AuthPayload, AccountError> {
        let email = input.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AccountError::InvalidInput("email is not valid".to_string()));
        }
        if input.password.is_empty() {
            return Err(AccountError::InvalidInput("password is required".to_string()));
        }
        let role = input.role.unwrap_or_default();
        if role == Role::PlatformAdmin {
            return Err(AccountError::InvalidInput(
                "role PLATFORM_ADMIN cannot be requested at signup".to_string(),
            ));
        }

        let password_hash = credentials::hash_password_blocking(input.password).await?;
        let user = self
            .directory
            .create(NewUser {
                email: Email::new(email),
                password_hash: Some(password_hash),
                first_name: input.first_name,
                last_name: input.last_name,
                avatar_url: None,
                role,
            })
            .await?;

        info!(user_id = user.uid, "Signup completed");
        self.payload_for(&user)
    }

    /// Check a password and issue a token.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, AccountError> {
        let email = Email::new(email.trim());
        let Some(user) = self.directory.find_by_email(&email).await? else {
            debug!("Login for unknown email");
            return Err(AccountError::InvalidCredentials);
        };
        let Some(hash) = user.password_hash.clone() else {
            debug!(user_id = user.uid, "Password login for an account without a password");
            return Err(AccountError::InvalidCredentials);
        };

        if !credentials::verify_password_blocking(hash, password.to_string()).await? {
            debug!(user_id = user.uid, "Password mismatch");
            return Err(AccountError::InvalidCredentials);
        }

        self.payload_for(&user)
    }

    fn payload_for(&self, user: &UserRecord) -> Result<AuthPayload, AccountError> {
        let token = self.tokens.issue(user.id(), user.role)?;
        Ok(AuthPayload {
            token,
            user: UserProfile::from(user),
        })
    }
}
