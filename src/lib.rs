// Core modules
pub mod api;
pub mod auth;
pub mod config;
mod db;
pub mod oauth;
pub mod server;
pub mod types;

// Re-export key types and functions
pub use db::{
    Association, CauseRecord, DatabaseConfig, Db, NewUser, SkillRecord, UserRecord,
    create_connection, ensure_schema,
};
pub use auth::{
    CurrentUser, IdentityResolver, RequestIdentity, TokenService, UserStore, identity_gate,
};
pub use config::{AppConfig, ConfigError};
pub use oauth::OAuthProvisioner;
