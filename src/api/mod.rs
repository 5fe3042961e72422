// REST API endpoints for the identity service

use axum::{
    Router,
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{
    AccountError, AccountService, AuthPayload, CurrentUser, IdentityResolver, LoginInput,
    RequestIdentity, SignupInput, TokenService, UserProfile, identity_gate,
};
use crate::oauth::{CallbackParams, OAuthError, OAuthProvisioner};
use crate::types::ProviderName;

/// Shared handles for every route.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub resolver: Arc<IdentityResolver>,
    pub accounts: Arc<AccountService>,
    /// `None` when OAuth is not configured; the provider routes then 404.
    pub oauth: Option<Arc<OAuthProvisioner>>,
}

impl FromRef<AppState> for Arc<IdentityResolver> {
    fn from_ref(state: &AppState) -> Self {
        state.resolver.clone()
    }
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/session", get(session))
        .route("/auth/exchange", post(exchange_code))
        .route("/auth/{provider}/login", get(oauth_login))
        .route("/auth/{provider}/callback", get(oauth_callback))
        .layer(middleware::from_fn_with_state(
            state.tokens.clone(),
            identity_gate,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn signup(
    State(state): State<AppState>,
    Json(input): Json<SignupInput>,
) -> Result<Json<AuthPayload>, AccountError> {
    state.accounts.signup(input).await.map(Json)
}

async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> Result<Json<AuthPayload>, AccountError> {
    state
        .accounts
        .login(&input.email, &input.password)
        .await
        .map(Json)
}

/// The authenticated account with its skills and causes.
async fn me(CurrentUser(user): CurrentUser) -> Json<UserProfile> {
    Json(UserProfile::from(&user))
}

/// Optional-identity endpoint: reports what the gate concluded without
/// touching the store. Never fails.
async fn session(State(state): State<AppState>, identity: RequestIdentity) -> Json<Value> {
    let claims = identity.token().and_then(|token| {
        state
            .tokens
            .extract_identity_claim(token)
            .ok()
            .map(|user_id| (user_id, token.role()))
    });

    match claims {
        Some((user_id, role)) => Json(serde_json::json!({
            "authenticated": true,
            "user_id": user_id,
            "role": role,
        })),
        None => Json(serde_json::json!({ "authenticated": false })),
    }
}

fn provisioner_for(
    state: &AppState,
    provider: &ProviderName,
) -> Result<Arc<OAuthProvisioner>, Response> {
    match &state.oauth {
        Some(oauth) if oauth.provider_name() == provider.as_str() => Ok(oauth.clone()),
        _ => Err((StatusCode::NOT_FOUND, "Unknown OAuth provider").into_response()),
    }
}

async fn oauth_login(State(state): State<AppState>, Path(provider): Path<ProviderName>) -> Response {
    let oauth = match provisioner_for(&state, &provider) {
        Ok(oauth) => oauth,
        Err(response) => return response,
    };

    match oauth.start().await {
        Ok(url) => Redirect::temporary(url.as_str()).into_response(),
        Err(e) => log_flow_error(e).into_response(),
    }
}

async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<ProviderName>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let oauth = match provisioner_for(&state, &provider) {
        Ok(oauth) => oauth,
        Err(response) => return response,
    };

    match oauth.complete(params).await {
        Ok(url) => Redirect::temporary(url.as_str()).into_response(),
        Err(e) => log_flow_error(e).into_response(),
    }
}

fn log_flow_error(e: OAuthError) -> OAuthError {
    warn!(step = %e.step(), error = %e, "OAuth flow failed");
    e
}

#[derive(Debug, Deserialize)]
struct ExchangeRequest {
    code: String,
}

async fn exchange_code(
    State(state): State<AppState>,
    Json(request): Json<ExchangeRequest>,
) -> Response {
    let Some(oauth) = state.oauth.clone() else {
        return (StatusCode::NOT_FOUND, "OAuth is not configured").into_response();
    };

    match oauth.redeem_handoff(&request.code).await {
        Ok(token) => Json(serde_json::json!({ "token": token })).into_response(),
        Err(e) => e.into_response(),
    }
}
