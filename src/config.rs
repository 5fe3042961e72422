use std::fmt;
use std::time::Duration;

use url::Url;

use crate::auth::resolver::DEFAULT_LOOKUP_TIMEOUT;
use crate::auth::token::SubjectEncoding;
use crate::db::DatabaseConfig;
use crate::oauth::TokenDelivery;

/// Path the provider redirects back to when `OAUTH_REDIRECT_URL` is unset,
/// relative to the frontend URL.
pub const DEFAULT_CALLBACK_PATH: &str = "/auth/google/callback";

/// Startup configuration errors. All are fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingSigningSecret,
    InvalidUrl { name: &'static str, reason: String },
    /// Some but not all of the OAuth settings were provided.
    IncompleteOAuth { missing: Vec<&'static str> },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSigningSecret => write!(f, "JWT_SECRET must be set to a non-empty value"),
            Self::InvalidUrl { name, reason } => write!(f, "{} is not a valid URL: {}", name, reason),
            Self::IncompleteOAuth { missing } => {
                write!(f, "OAuth is partially configured; missing {}", missing.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Raw OAuth inputs as read from the environment or CLI.
#[derive(Debug, Clone, Default)]
pub struct OAuthSources {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
    pub frontend_url: Option<String>,
    pub delivery: TokenDelivery,
}

/// Validated Google OAuth settings.
#[derive(Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: Url,
    pub frontend_url: Url,
    pub delivery: TokenDelivery,
}

impl fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("redirect_url", &self.redirect_url.as_str())
            .field("frontend_url", &self.frontend_url.as_str())
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

impl OAuthSettings {
    /// `Ok(None)` when nothing is configured (OAuth routes disabled).
    pub fn from_sources(sources: OAuthSources) -> Result<Option<Self>, ConfigError> {
        let client_id = non_empty(sources.client_id);
        let client_secret = non_empty(sources.client_secret);
        let frontend_url = non_empty(sources.frontend_url);
        let redirect_url = non_empty(sources.redirect_url);

        if client_id.is_none() && client_secret.is_none() && redirect_url.is_none() {
            return Ok(None);
        }

        let mut missing = Vec::new();
        if client_id.is_none() {
            missing.push("GOOGLE_OAUTH_CLIENT_ID");
        }
        if client_secret.is_none() {
            missing.push("GOOGLE_OAUTH_CLIENT_SECRET");
        }
        if frontend_url.is_none() {
            missing.push("FRONTEND_URL");
        }
        let (Some(client_id), Some(client_secret), Some(frontend_url)) =
            (client_id, client_secret, frontend_url)
        else {
            return Err(ConfigError::IncompleteOAuth { missing });
        };

        let frontend_url = parse_url("FRONTEND_URL", &frontend_url)?;
        let redirect_url = match redirect_url {
            Some(raw) => parse_url("OAUTH_REDIRECT_URL", &raw)?,
            None => {
                let raw = format!(
                    "{}{}",
                    frontend_url.as_str().trim_end_matches('/'),
                    DEFAULT_CALLBACK_PATH
                );
                parse_url("OAUTH_REDIRECT_URL", &raw)?
            }
        };

        Ok(Some(Self {
            client_id,
            client_secret,
            redirect_url,
            frontend_url,
            delivery: sources.delivery,
        }))
    }
}

/// Everything the server needs, validated before any listener is bound.
#[derive(Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub subject_encoding: SubjectEncoding,
    pub lookup_timeout: Duration,
    pub oauth: Option<OAuthSettings>,
    pub database: DatabaseConfig,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("subject_encoding", &self.subject_encoding)
            .field("lookup_timeout", &self.lookup_timeout)
            .field("oauth", &self.oauth)
            .field("database", &self.database.url)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn new(
        jwt_secret: Option<String>,
        oauth: OAuthSources,
        database: DatabaseConfig,
    ) -> Result<Self, ConfigError> {
        let jwt_secret = non_empty(jwt_secret).ok_or(ConfigError::MissingSigningSecret)?;
        Ok(Self {
            jwt_secret,
            subject_encoding: SubjectEncoding::default(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            oauth: OAuthSettings::from_sources(oauth)?,
            database,
        })
    }

    pub fn with_subject_encoding(mut self, encoding: SubjectEncoding) -> Self {
        self.subject_encoding = encoding;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        name,
        reason: e.to_string(),
    })
}
