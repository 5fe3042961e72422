//! Identity resolution: request context → authoritative account record.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{FromRef, FromRequestParts};
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use http::{Extensions, StatusCode};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::auth::context::RequestIdentity;
use crate::auth::token::{TokenError, TokenService};
use crate::auth::user_store::UserDirectory;
use crate::db::schema::{Association, UserRecord};
use crate::types::UserId;

/// Default deadline for the store lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a request could not be resolved to an account.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// The gate did not run for this request.
    InvalidContextValue,
    /// The gate ran and found no bearer credential.
    NotAuthenticated,
    /// The presented token failed verification, or verified but its
    /// claims could not be used.
    Token(TokenError),
    /// The subject names no existing account.
    UserNotFound { user_id: UserId, raw_claim: String },
    StoreUnavailable(String),
    DeadlineExceeded,
}

impl ResolveError {
    /// Stable identifier for the error family.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidContextValue => "invalid_context_value",
            Self::NotAuthenticated => "not_authenticated",
            Self::Token(TokenError::MissingSubjectClaim) => "missing_subject_claim",
            Self::Token(TokenError::UnrecognizedSubjectType { .. }) => "unrecognized_subject_type",
            Self::Token(TokenError::Expired) => "token_expired",
            Self::Token(_) => "invalid_token",
            Self::UserNotFound { .. } => "user_not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotAuthenticated | Self::Token(_) => StatusCode::UNAUTHORIZED,
            Self::UserNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidContextValue => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidContextValue => write!(f, "Invalid identity context value"),
            Self::NotAuthenticated => write!(f, "Not authenticated"),
            Self::Token(e) => write!(f, "{}", e),
            Self::UserNotFound { user_id, raw_claim } => {
                write!(f, "User not found for subject {} (claim {})", user_id, raw_claim)
            }
            Self::StoreUnavailable(msg) => write!(f, "User store unavailable: {}", msg),
            Self::DeadlineExceeded => write!(f, "User lookup deadline exceeded"),
        }
    }
}

impl std::error::Error for ResolveError {}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        // Store internals stay in the logs.
        let message = match &self {
            Self::StoreUnavailable(_) => "User store unavailable".to_string(),
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": message,
            "kind": self.kind(),
        }));
        (self.status(), body).into_response()
    }
}

/// Turns the gate's per-request conclusion into a fresh account record.
pub struct IdentityResolver {
    tokens: Arc<TokenService>,
    directory: Arc<dyn UserDirectory>,
    associations: Vec<Association>,
    lookup_timeout: Duration,
}

impl IdentityResolver {
    /// Create a resolver that eagerly loads every association.
    pub fn new(tokens: Arc<TokenService>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            tokens,
            directory,
            associations: Association::all(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Override which associations `resolve` loads.
    pub fn with_associations(mut self, associations: Vec<Association>) -> Self {
        self.associations = associations;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Resolve with the configured associations.
    pub async fn resolve(&self, extensions: &Extensions) -> Result<UserRecord, ResolveError> {
        self.resolve_with(extensions, &self.associations).await
    }

    /// Resolve, loading exactly `associations`.
    pub async fn resolve_with(
        &self,
        extensions: &Extensions,
        associations: &[Association],
    ) -> Result<UserRecord, ResolveError> {
        let identity = extensions
            .get::<RequestIdentity>()
            .ok_or(ResolveError::InvalidContextValue)?;

        let token = match identity {
            RequestIdentity::Anonymous => return Err(ResolveError::NotAuthenticated),
            RequestIdentity::Rejected(e) => return Err(ResolveError::Token(e.clone())),
            RequestIdentity::Verified(token) => token,
        };

        let user_id = self
            .tokens
            .extract_identity_claim(token)
            .map_err(ResolveError::Token)?;

        let lookup = self.directory.find_by_id(user_id, associations);
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Err(_) => {
                warn!(%user_id, "User lookup timed out");
                Err(ResolveError::DeadlineExceeded)
            }
            Ok(Err(e)) => {
                error!(%user_id, error = %e, "User lookup failed");
                Err(ResolveError::StoreUnavailable(e.to_string()))
            }
            Ok(Ok(None)) => {
                let raw_claim = token
                    .raw_subject()
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                debug!(%user_id, "Verified subject has no account");
                Err(ResolveError::UserNotFound { user_id, raw_claim })
            }
            Ok(Ok(Some(user))) => Ok(user),
        }
    }
}

/// Extractor yielding the authenticated account.
///
/// Requires the auth gate on the route and an `Arc<IdentityResolver>`
/// reachable from the router state.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<IdentityResolver>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ResolveError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<IdentityResolver>::from_ref(state);
        resolver.resolve(&parts.extensions).await.map(CurrentUser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::gate::authenticate;
    use crate::auth::user_store::{StoreError, UserStore};
    use crate::auth::user_store::tests::setup_test_store;
    use crate::db::schema::NewUser;
    use crate::types::{Email, Role};
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use std::future::Future;
    use std::pin::Pin;

    const SECRET: &str = "resolver-secret";

    type Fut<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

    /// Directory whose lookups never complete.
    struct StalledDirectory;

    impl UserDirectory for StalledDirectory {
        fn find_by_id<'a>(&'a self, _: UserId, _: &'a [Association]) -> Fut<'a, Option<UserRecord>> {
            Box::pin(std::future::pending())
        }
        fn find_by_email<'a>(&'a self, _: &'a Email) -> Fut<'a, Option<UserRecord>> {
            Box::pin(std::future::pending())
        }
        fn create(&self, _: NewUser) -> Fut<'_, UserRecord> {
            Box::pin(std::future::pending())
        }
    }

    /// Directory whose backing store is down.
    struct BrokenDirectory;

    impl UserDirectory for BrokenDirectory {
        fn find_by_id<'a>(&'a self, _: UserId, _: &'a [Association]) -> Fut<'a, Option<UserRecord>> {
            Box::pin(async { Err(StoreError::Unavailable("connection refused".to_string())) })
        }
        fn find_by_email<'a>(&'a self, _: &'a Email) -> Fut<'a, Option<UserRecord>> {
            Box::pin(async { Err(StoreError::Unavailable("connection refused".to_string())) })
        }
        fn create(&self, _: NewUser) -> Fut<'_, UserRecord> {
            Box::pin(async { Err(StoreError::Unavailable("connection refused".to_string())) })
        }
    }

    fn tokens() -> Arc<TokenService> {
        Arc::new(TokenService::new(SECRET).unwrap())
    }

    fn extensions_for(tokens: &TokenService, token: &str) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(RequestIdentity::Verified(tokens.verify(token).unwrap()));
        extensions
    }

    fn raw_token(claims: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn store_with_user() -> (UserStore, UserRecord) {
        let store = setup_test_store().await;
        let user = store
            .create(NewUser::external(
                Email::new("resolve@example.org"),
                "Rosa".to_string(),
                "Parks".to_string(),
            ))
            .await
            .unwrap();
        (store, user)
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn test_resolves_issued_token() {
        let tokens = tokens();
        let (store, user) = store_with_user().await;
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(store));

        let token = tokens.issue(user.id(), user.role).unwrap();
        let resolved = resolver.resolve(&extensions_for(&tokens, &token)).await.unwrap();
        assert_eq!(resolved.uid, user.uid);
        assert_eq!(resolved.email, "resolve@example.org");
    }

    #[tokio::test]
    async fn test_numeric_and_text_subjects_resolve_identically() {
        let tokens = tokens();
        let (store, user) = store_with_user().await;
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(store));

        let numeric = raw_token(json!({ "sub": user.uid, "exp": future_exp() }));
        let float = raw_token(json!({ "sub": user.uid as f64, "exp": future_exp() }));
        let text = raw_token(json!({ "sub": user.uid.to_string(), "exp": future_exp() }));

        for token in [numeric, float, text] {
            let resolved = resolver.resolve(&extensions_for(&tokens, &token)).await.unwrap();
            assert_eq!(resolved.uid, user.uid);
        }
    }

    #[tokio::test]
    async fn test_missing_context_is_invalid_context_value() {
        let (store, _) = store_with_user().await;
        let resolver = IdentityResolver::new(tokens(), Arc::new(store));

        let err = resolver.resolve(&Extensions::new()).await.unwrap_err();
        assert_eq!(err, ResolveError::InvalidContextValue);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_anonymous_is_not_authenticated() {
        let (store, _) = store_with_user().await;
        let resolver = IdentityResolver::new(tokens(), Arc::new(store));

        let mut extensions = Extensions::new();
        extensions.insert(RequestIdentity::Anonymous);
        let err = resolver.resolve(&extensions).await.unwrap_err();
        assert_eq!(err, ResolveError::NotAuthenticated);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_claim_errors_propagate_unchanged() {
        let tokens = tokens();
        let (store, _) = store_with_user().await;
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(store));

        let no_sub = raw_token(json!({ "exp": future_exp() }));
        let err = resolver.resolve(&extensions_for(&tokens, &no_sub)).await.unwrap_err();
        assert_eq!(err, ResolveError::Token(TokenError::MissingSubjectClaim));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let bool_sub = raw_token(json!({ "sub": true, "exp": future_exp() }));
        let err = resolver.resolve(&extensions_for(&tokens, &bool_sub)).await.unwrap_err();
        assert_eq!(
            err,
            ResolveError::Token(TokenError::UnrecognizedSubjectType {
                observed: "boolean".to_string()
            })
        );
        assert_eq!(err.kind(), "unrecognized_subject_type");
    }

    fn gate_extensions(tokens: &TokenService, token: &str) -> Extensions {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        let mut extensions = Extensions::new();
        extensions.insert(authenticate(tokens, &headers));
        extensions
    }

    #[tokio::test]
    async fn test_expired_token_reports_expiry() {
        let tokens = tokens();
        let (store, user) = store_with_user().await;
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(store));

        let expired = tokens
            .issue_at(user.id(), user.role, chrono::Utc::now() - chrono::Duration::days(8))
            .unwrap();
        let err = resolver.resolve(&gate_extensions(&tokens, &expired)).await.unwrap_err();
        assert_eq!(err, ResolveError::Token(TokenError::Expired));
        assert_eq!(err.kind(), "token_expired");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_tampered_token_reports_signature() {
        let tokens = tokens();
        let (store, user) = store_with_user().await;
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(store));

        let token = tokens.issue(user.id(), user.role).unwrap();
        let (signed, signature) = token.rsplit_once('.').unwrap();
        let forged_signature = raw_token(json!({ "sub": 999, "exp": future_exp() }))
            .rsplit_once('.')
            .unwrap()
            .1
            .to_string();
        assert_ne!(signature, forged_signature);
        let tampered = format!("{}.{}", signed, forged_signature);

        let err = resolver.resolve(&gate_extensions(&tokens, &tampered)).await.unwrap_err();
        assert_eq!(err, ResolveError::Token(TokenError::InvalidSignature));
        assert_eq!(err.kind(), "invalid_token");
    }

    #[tokio::test]
    async fn test_unknown_subject_is_user_not_found() {
        let tokens = tokens();
        let (store, _) = store_with_user().await;
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(store));

        let token = raw_token(json!({ "sub": "4040", "exp": future_exp() }));
        let err = resolver.resolve(&extensions_for(&tokens, &token)).await.unwrap_err();
        assert_eq!(
            err,
            ResolveError::UserNotFound {
                user_id: UserId::new(4040),
                raw_claim: "\"4040\"".to_string(),
            }
        );
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_store_failure_is_distinct_from_not_found() {
        let tokens = tokens();
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(BrokenDirectory));

        let token = tokens.issue(UserId::new(1), Role::Volunteer).unwrap();
        let err = resolver.resolve(&extensions_for(&tokens, &token)).await.unwrap_err();
        assert!(matches!(err, ResolveError::StoreUnavailable(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_stalled_lookup_hits_deadline() {
        let tokens = tokens();
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(StalledDirectory))
            .with_lookup_timeout(Duration::from_millis(20));

        let token = tokens.issue(UserId::new(1), Role::Volunteer).unwrap();
        let err = resolver.resolve(&extensions_for(&tokens, &token)).await.unwrap_err();
        assert_eq!(err, ResolveError::DeadlineExceeded);
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_resolve_with_limits_associations() {
        let tokens = tokens();
        let (store, user) = store_with_user().await;
        store
            .db()
            .query(
                "CREATE skill:design CONTENT { name: 'Design' };
                 UPDATE user SET skills += skill:design WHERE uid = $uid;",
            )
            .bind(("uid", user.uid))
            .await
            .unwrap()
            .check()
            .unwrap();
        let resolver = IdentityResolver::new(tokens.clone(), Arc::new(store));
        let token = tokens.issue(user.id(), user.role).unwrap();
        let extensions = extensions_for(&tokens, &token);

        let full = resolver.resolve(&extensions).await.unwrap();
        assert_eq!(full.skills.len(), 1);
        assert_eq!(full.skills[0].name, "Design");

        let bare = resolver.resolve_with(&extensions, &[]).await.unwrap();
        assert!(bare.skills.is_empty());
    }

    #[test]
    fn test_error_response_status() {
        let response = ResolveError::NotAuthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ResolveError::StoreUnavailable("secret dsn".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
