//! Authentication and identity module.
//!
//! Request flow:
//!
//! - **Gate** ([`identity_gate`]): wraps every route, reads the optional
//!   `Authorization: Bearer` header and attaches a [`RequestIdentity`] to the
//!   request. It never rejects.
//! - **Resolver** ([`IdentityResolver`], [`CurrentUser`]): on demand, turns a
//!   verified token into a freshly loaded [`crate::db::UserRecord`].
//! - **Accounts** ([`AccountService`]): password signup and login, both
//!   returning a bearer token from the [`TokenService`].
//!
//! ## Security Model
//!
//! - Tokens are HMAC-signed, expire after seven days and are never revoked
//!   server-side.
//! - Passwords are stored only as Argon2id PHC strings.
//! - Tokens, secrets and passwords are never logged.

pub mod accounts;
pub mod context;
pub mod credentials;
pub mod gate;
pub mod resolver;
pub mod token;
pub mod user_store;

pub use accounts::{AccountError, AccountService, AuthPayload, LoginInput, SignupInput, UserProfile};
pub use context::RequestIdentity;
pub use credentials::{CredentialError, hash_password, verify_password};
pub use gate::{authenticate, bearer_token, identity_gate};
pub use resolver::{CurrentUser, IdentityResolver, ResolveError};
pub use token::{SubjectClaim, SubjectEncoding, TOKEN_TTL_SECONDS, TokenError, TokenService, VerifiedToken};
pub use user_store::{StoreError, UserDirectory, UserStore, find_or_create_by_email};
