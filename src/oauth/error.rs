use std::fmt;

use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::auth::token::TokenError;

/// Stages of the authorization-code flow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    Start,
    AuthorizationRedirect,
    CodeExchange,
    ProfileFetch,
    AccountLookupOrCreate,
    TokenIssue,
    FrontendRedirect,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AuthorizationRedirect => "authorization_redirect",
            Self::CodeExchange => "code_exchange",
            Self::ProfileFetch => "profile_fetch",
            Self::AccountLookupOrCreate => "account_lookup_or_create",
            Self::TokenIssue => "token_issue",
            Self::FrontendRedirect => "frontend_redirect",
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth flow errors. Each one is tied to the step that produced it.
#[derive(Debug, Clone)]
pub enum OAuthError {
    /// Unknown, expired or already consumed `state`.
    InvalidState,
    MissingCode,
    /// The provider redirected back with an `error` parameter.
    ProviderDenied(String),
    ExchangeFailure(String),
    ProfileFetchFailure(String),
    ProfileDecodeFailure(String),
    /// The provider says the profile email is not verified.
    UnverifiedEmail,
    AccountFailure(String),
    TokenIssue(TokenError),
    /// Unknown or expired one-time handoff code.
    InvalidHandoffCode,
    DeadlineExceeded(FlowStep),
    Internal(String),
}

impl OAuthError {
    pub fn step(&self) -> FlowStep {
        match self {
            Self::InvalidState | Self::MissingCode | Self::ProviderDenied(_) => {
                FlowStep::AuthorizationRedirect
            }
            Self::ExchangeFailure(_) => FlowStep::CodeExchange,
            Self::ProfileFetchFailure(_) | Self::ProfileDecodeFailure(_) | Self::UnverifiedEmail => {
                FlowStep::ProfileFetch
            }
            Self::AccountFailure(_) => FlowStep::AccountLookupOrCreate,
            Self::TokenIssue(_) => FlowStep::TokenIssue,
            Self::InvalidHandoffCode => FlowStep::FrontendRedirect,
            Self::DeadlineExceeded(step) => *step,
            Self::Internal(_) => FlowStep::Start,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidState
            | Self::MissingCode
            | Self::ProviderDenied(_)
            | Self::ExchangeFailure(_)
            | Self::ProfileFetchFailure(_)
            | Self::ProfileDecodeFailure(_)
            | Self::InvalidHandoffCode => StatusCode::BAD_REQUEST,
            Self::UnverifiedEmail => StatusCode::FORBIDDEN,
            Self::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::AccountFailure(_) | Self::TokenIssue(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing text. Provider and store details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidState => "Invalid or expired OAuth state",
            Self::MissingCode => "Missing authorization code",
            Self::ProviderDenied(_) => "Authorization was denied by the provider",
            Self::ExchangeFailure(_) => "Failed to exchange token",
            Self::ProfileFetchFailure(_) => "Failed to get user info",
            Self::ProfileDecodeFailure(_) => "Failed to decode user info",
            Self::UnverifiedEmail => "Email address is not verified",
            Self::AccountFailure(_) => "Failed to create user",
            Self::TokenIssue(_) => "Failed to generate token",
            Self::InvalidHandoffCode => "Invalid or expired code",
            Self::DeadlineExceeded(_) => "OAuth provider did not respond in time",
            Self::Internal(_) => "Internal error",
        }
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState => write!(f, "Invalid OAuth state"),
            Self::MissingCode => write!(f, "Callback carried no authorization code"),
            Self::ProviderDenied(reason) => write!(f, "Provider denied authorization: {}", reason),
            Self::ExchangeFailure(msg) => write!(f, "Code exchange failed: {}", msg),
            Self::ProfileFetchFailure(msg) => write!(f, "Profile fetch failed: {}", msg),
            Self::ProfileDecodeFailure(msg) => write!(f, "Profile decode failed: {}", msg),
            Self::UnverifiedEmail => write!(f, "Provider profile email is unverified"),
            Self::AccountFailure(msg) => write!(f, "Account lookup or creation failed: {}", msg),
            Self::TokenIssue(e) => write!(f, "{}", e),
            Self::InvalidHandoffCode => write!(f, "Invalid handoff code"),
            Self::DeadlineExceeded(step) => write!(f, "Deadline exceeded during {}", step),
            Self::Internal(msg) => write!(f, "Internal OAuth error: {}", msg),
        }
    }
}

impl std::error::Error for OAuthError {}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}
