//! Request-scoped identity attached by the auth gate.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use http::request::Parts;

use crate::auth::token::{TokenError, VerifiedToken};

/// What the gate concluded about the caller of one request.
///
/// The gate always inserts exactly one of these into the request
/// extensions. It never holds a user record; resolving the subject to an
/// account is the identity resolver's job.
#[derive(Debug, Clone)]
pub enum RequestIdentity {
    /// No bearer credential was presented, or the header was not one.
    Anonymous,
    /// A bearer token was presented but failed verification. Kept so that
    /// handlers demanding identity can report why.
    Rejected(TokenError),
    /// A token passed verification.
    Verified(VerifiedToken),
}

impl RequestIdentity {
    /// The verified token, if any.
    pub fn token(&self) -> Option<&VerifiedToken> {
        match self {
            Self::Verified(token) => Some(token),
            Self::Anonymous | Self::Rejected(_) => None,
        }
    }

    /// Why the presented token was refused, if one was.
    pub fn rejection(&self) -> Option<&TokenError> {
        match self {
            Self::Rejected(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestIdentity>()
            .cloned()
            .unwrap_or(RequestIdentity::Anonymous))
    }
}
