//! Authorization-code login with just-in-time account provisioning.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::auth::token::TokenService;
use crate::auth::user_store::{UserDirectory, find_or_create_by_email};
use crate::db::schema::NewUser;
use crate::oauth::error::OAuthError;
use crate::oauth::provider::{GoogleProfile, GoogleProvider};
use crate::oauth::state::{ExpiringStore, PendingFlow, code_challenge, random_token};
use crate::types::Email;

/// How long a started flow waits for its callback.
pub const PENDING_FLOW_TTL_SECONDS: i64 = 600;
/// How long a one-time handoff code stays redeemable.
pub const HANDOFF_CODE_TTL_SECONDS: i64 = 60;
/// Upper bound on flows awaiting their callback. Older flows are evicted.
pub const MAX_PENDING_FLOWS: usize = 10_000;
/// Upper bound on unredeemed handoff codes.
pub const MAX_HANDOFF_CODES: usize = 10_000;

/// How the issued token reaches the frontend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenDelivery {
    /// `<frontend>?token=<token>`
    #[default]
    QueryParameter,
    /// `<frontend>?code=<code>`, redeemed once via `POST /auth/exchange`.
    OneTimeCode,
}

impl FromStr for TokenDelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "query" | "query_parameter" => Ok(Self::QueryParameter),
            "code" | "one_time_code" => Ok(Self::OneTimeCode),
            other => Err(format!("unknown token delivery: {}", other)),
        }
    }
}

/// Query parameters of the provider callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Drives the flow from authorization redirect to frontend redirect.
pub struct OAuthProvisioner {
    provider: GoogleProvider,
    tokens: Arc<TokenService>,
    directory: Arc<dyn UserDirectory>,
    frontend_url: Url,
    delivery: TokenDelivery,
    pending: ExpiringStore<PendingFlow>,
    handoffs: ExpiringStore<String>,
}

impl OAuthProvisioner {
    pub fn new(
        provider: GoogleProvider,
        tokens: Arc<TokenService>,
        directory: Arc<dyn UserDirectory>,
        frontend_url: Url,
    ) -> Self {
        Self {
            provider,
            tokens,
            directory,
            frontend_url,
            delivery: TokenDelivery::default(),
            pending: ExpiringStore::new(
                Duration::seconds(PENDING_FLOW_TTL_SECONDS),
                MAX_PENDING_FLOWS,
            ),
            handoffs: ExpiringStore::new(
                Duration::seconds(HANDOFF_CODE_TTL_SECONDS),
                MAX_HANDOFF_CODES,
            ),
        }
    }

    pub fn with_delivery(mut self, delivery: TokenDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// Bound the number of flows awaiting a callback.
    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending = ExpiringStore::new(Duration::seconds(PENDING_FLOW_TTL_SECONDS), capacity);
        self
    }

    /// Provider name used in the route path.
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Begin a flow: remember a fresh state and PKCE verifier, and return
    /// the provider URL to redirect to.
    pub async fn start(&self) -> Result<Url, OAuthError> {
        let state = random_token()?;
        let pkce_verifier = random_token()?;
        let url = self
            .provider
            .authorization_url(&state, &code_challenge(&pkce_verifier));

        self.pending.insert(state, PendingFlow { pkce_verifier }).await;
        Ok(url)
    }

    /// Finish a flow and return the frontend redirect.
    pub async fn complete(&self, params: CallbackParams) -> Result<Url, OAuthError> {
        let state = params.state.as_deref().ok_or(OAuthError::InvalidState)?;
        let flow = self
            .pending
            .take(state)
            .await
            .ok_or(OAuthError::InvalidState)?;

        if let Some(reason) = params.error {
            warn!(provider = self.provider_name(), %reason, "Provider denied authorization");
            return Err(OAuthError::ProviderDenied(reason));
        }
        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(OAuthError::MissingCode)?;

        let provider_tokens = self
            .provider
            .exchange_code(&code, &flow.pkce_verifier)
            .await?;
        let profile = self
            .provider
            .fetch_profile(&provider_tokens.access_token)
            .await?;

        let (user, created) = find_or_create_by_email(self.directory.as_ref(), new_user_from(profile)?)
            .await
            .map_err(|e| {
                warn!(error = %e, "OAuth account lookup failed");
                OAuthError::AccountFailure(e.to_string())
            })?;

        let token = self
            .tokens
            .issue(user.id(), user.role)
            .map_err(OAuthError::TokenIssue)?;

        info!(
            provider = self.provider_name(),
            user_id = user.uid,
            created,
            "OAuth login completed"
        );
        self.frontend_redirect(token).await
    }

    /// Swap a one-time handoff code for its token.
    pub async fn redeem_handoff(&self, code: &str) -> Result<String, OAuthError> {
        self.handoffs
            .take(code)
            .await
            .ok_or(OAuthError::InvalidHandoffCode)
    }

    /// Drop expired pending flows and handoff codes.
    pub async fn cleanup_expired(&self) -> usize {
        self.pending.cleanup_expired().await + self.handoffs.cleanup_expired().await
    }

    async fn frontend_redirect(&self, token: String) -> Result<Url, OAuthError> {
        let mut url = self.frontend_url.clone();
        match self.delivery {
            TokenDelivery::QueryParameter => {
                url.query_pairs_mut().append_pair("token", &token);
            }
            TokenDelivery::OneTimeCode => {
                let code = random_token()?;
                url.query_pairs_mut().append_pair("code", &code);
                self.handoffs.insert(code, token).await;
            }
        }
        Ok(url)
    }
}

fn new_user_from(profile: GoogleProfile) -> Result<NewUser, OAuthError> {
    let email = profile
        .email
        .ok_or_else(|| OAuthError::ProfileDecodeFailure("profile has no email".to_string()))?;

    let mut new_user = NewUser::external(
        Email::new(email),
        profile.given_name.unwrap_or_default(),
        profile.family_name.unwrap_or_default(),
    );
    new_user.avatar_url = profile.picture;
    Ok(new_user)
}
