//! Auth gate: per-request bearer token extraction.
//!
//! The gate is fail-open. A missing or invalid token never rejects the
//! request; it only decides whether the downstream handlers see a
//! [`RequestIdentity::Verified`], a [`RequestIdentity::Rejected`] token,
//! or [`RequestIdentity::Anonymous`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue};
use tracing::debug;

use crate::auth::context::RequestIdentity;
use crate::auth::token::TokenService;

/// Pull the token out of an `Authorization` header value.
///
/// The value must be exactly two space-separated parts, the first of which
/// is `Bearer` in any letter case. Extra spaces produce empty parts and
/// therefore fail.
pub fn bearer_token(value: &HeaderValue) -> Option<&str> {
    let value = value.to_str().ok()?;
    let parts: Vec<&str> = value.split(' ').collect();
    let [scheme, token] = parts.as_slice() else {
        return None;
    };
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

/// Classify a request by its headers.
pub fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> RequestIdentity {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return RequestIdentity::Anonymous;
    };

    let Some(token) = bearer_token(value) else {
        debug!("Authorization header present but not a bearer credential");
        return RequestIdentity::Anonymous;
    };

    match tokens.verify(token) {
        Ok(verified) => RequestIdentity::Verified(verified),
        Err(e) => {
            debug!(error = %e, "Bearer token rejected");
            RequestIdentity::Rejected(e)
        }
    }
}

/// Axum middleware wrapping every route. Always forwards to `next`.
pub async fn identity_gate(
    State(tokens): State<Arc<TokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = authenticate(&tokens, request.headers());
    request.extensions_mut().insert(identity);
    next.run(request).await
}
