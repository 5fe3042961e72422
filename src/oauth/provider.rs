//! Google OAuth 2.0 endpoints.

use std::time::Duration;

use http::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::oauth::error::{FlowStep, OAuthError};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Scopes requested on every authorization.
pub const GOOGLE_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Timeout applied to every call to the provider.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the provider lives. Overridable so tests can point at a mock.
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub auth_url: Url,
    pub token_url: Url,
    pub userinfo_url: Url,
}

impl GoogleEndpoints {
    pub fn google() -> Result<Self, OAuthError> {
        Ok(Self {
            auth_url: parse_url(GOOGLE_AUTH_URL)?,
            token_url: parse_url(GOOGLE_TOKEN_URL)?,
            userinfo_url: parse_url(GOOGLE_USERINFO_URL)?,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, OAuthError> {
    Url::parse(raw).map_err(|e| OAuthError::Internal(format!("invalid endpoint {}: {}", raw, e)))
}

/// Token endpoint response. Only the access token is used.
#[derive(Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
}

/// Fields read from the userinfo endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleProfile {
    #[serde(default)]
    pub email: Option<String>,
    /// Absent on some accounts; only an explicit `false` is refused.
    #[serde(default)]
    pub verified_email: Option<bool>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_url: Url,
    endpoints: GoogleEndpoints,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_url: Url,
        endpoints: GoogleEndpoints,
    ) -> Result<Self, OAuthError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| OAuthError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_url,
            endpoints,
            http,
        })
    }

    pub fn name(&self) -> &'static str {
        "google"
    }

    /// Authorization URL for one flow.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        let mut url = self.endpoints.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", &GOOGLE_SCOPES.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        url
    }

    /// Exchange an authorization code for provider tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, OAuthError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("code_verifier", code_verifier)
            .finish();

        let response = self
            .http
            .post(self.endpoints.token_url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(e, FlowStep::CodeExchange))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Token endpoint rejected the authorization code");
            return Err(OAuthError::ExchangeFailure(format!(
                "token endpoint returned {}",
                status
            )));
        }

        response
            .json::<ProviderTokens>()
            .await
            .map_err(|e| OAuthError::ExchangeFailure(format!("invalid token response: {}", e)))
    }

    /// Fetch the signed-in user's profile.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<GoogleProfile, OAuthError> {
        let response = self
            .http
            .get(self.endpoints.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(e, FlowStep::ProfileFetch))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Userinfo endpoint returned an error");
            return Err(OAuthError::ProfileFetchFailure(format!(
                "userinfo endpoint returned {}",
                status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, FlowStep::ProfileFetch))?;
        let profile: GoogleProfile = serde_json::from_slice(&bytes)
            .map_err(|e| OAuthError::ProfileDecodeFailure(e.to_string()))?;

        match profile.email.as_deref() {
            Some(email) if !email.trim().is_empty() => {}
            _ => {
                return Err(OAuthError::ProfileDecodeFailure(
                    "profile has no email".to_string(),
                ));
            }
        }
        if profile.verified_email == Some(false) {
            warn!("Provider reports the account email as unverified");
            return Err(OAuthError::UnverifiedEmail);
        }
        Ok(profile)
    }
}

fn transport_error(e: reqwest::Error, step: FlowStep) -> OAuthError {
    if e.is_timeout() {
        return OAuthError::DeadlineExceeded(step);
    }
    let msg = e.without_url().to_string();
    match step {
        FlowStep::CodeExchange => OAuthError::ExchangeFailure(msg),
        _ => OAuthError::ProfileFetchFailure(msg),
    }
}
