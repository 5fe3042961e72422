//! Bearer token issuance and verification.
//!
//! Tokens are compact JWS strings signed with a symmetric HMAC secret. The
//! claims carry `sub` (user id), `role`, `exp` and `iat`. Depending on the
//! issuer, `sub` may arrive as a JSON integer, an integral JSON float, or a
//! decimal string; [`SubjectClaim`] parses all three explicitly and
//! normalizes them to a [`UserId`].

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Role, UserId};

/// Lifetime of every issued token (7 days).
pub const TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Largest integer an IEEE-754 double represents exactly (2^53).
pub const MAX_EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Algorithms accepted on verification. Tokens are always issued as HS256.
const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
const HMAC_ALGORITHM_NAMES: [&str; 3] = ["HS256", "HS384", "HS512"];

/// Token service errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenError {
    /// The token could not be signed (empty secret, encoder failure).
    SigningFailure(String),
    /// The token is not a structurally valid compact JWS.
    Malformed(String),
    /// The signature does not match the payload under our secret.
    InvalidSignature,
    /// The header names an algorithm outside the HMAC family.
    UnsupportedAlgorithm(String),
    /// `exp` is not in the future.
    Expired,
    /// The claims carry no `sub`.
    MissingSubjectClaim,
    /// `sub` is present but not an integer-like number or decimal string.
    UnrecognizedSubjectType { observed: String },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningFailure(msg) => write!(f, "Token signing failed: {}", msg),
            Self::Malformed(msg) => write!(f, "Malformed token: {}", msg),
            Self::InvalidSignature => write!(f, "Invalid token signature"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "Unsupported token algorithm: {}", alg),
            Self::Expired => write!(f, "Token expired"),
            Self::MissingSubjectClaim => write!(f, "Subject (sub) claim missing in token"),
            Self::UnrecognizedSubjectType { observed } => {
                write!(f, "Unrecognized type for subject (sub) claim: {}", observed)
            }
        }
    }
}

impl std::error::Error for TokenError {}

/// How the issuer writes `sub` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubjectEncoding {
    /// `"sub": 42`
    #[default]
    Number,
    /// `"sub": "42"`
    Text,
}

impl FromStr for SubjectEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "number" | "numeric" => Ok(Self::Number),
            "text" | "string" => Ok(Self::Text),
            other => Err(format!("unknown subject encoding: {}", other)),
        }
    }
}

/// Claims written at issuance.
#[derive(Debug, Serialize)]
struct IssuedClaims {
    sub: Value,
    role: Role,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: Option<String>,
}

/// A token whose signature, algorithm and expiry have been checked.
///
/// Only [`TokenService::verify`] constructs this type, so holding one is
/// proof of verification. The subject is deliberately left unparsed.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    algorithm: Algorithm,
    claims: Map<String, Value>,
    expires_at: i64,
}

impl VerifiedToken {
    /// The decoded claim set, exactly as the generic JSON decoder produced it.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Expiry as seconds since the epoch.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// The `sub` claim before normalization.
    pub fn raw_subject(&self) -> Option<&Value> {
        self.claims.get("sub")
    }

    /// The `role` claim, if it names a known role.
    pub fn role(&self) -> Option<Role> {
        self.claims
            .get("role")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Explicit tagged union over the encodings a `sub` claim may take.
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectClaim {
    /// A JSON number without fraction or exponent.
    Integer(i64),
    /// A JSON number the decoder widened to a double.
    Float(f64),
    /// A JSON string.
    Text(String),
}

impl SubjectClaim {
    /// Classify a raw claim value without coercing it.
    pub fn from_value(value: &Value) -> Result<Self, TokenError> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Integer(i))
                } else if n.is_u64() {
                    Err(unrecognized("integer outside the signed 64-bit range"))
                } else {
                    n.as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| unrecognized("number"))
                }
            }
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Bool(_) => Err(unrecognized("boolean")),
            Value::Null => Err(unrecognized("null")),
            Value::Array(_) => Err(unrecognized("array")),
            Value::Object(_) => Err(unrecognized("object")),
        }
    }

    /// Normalize to the canonical identifier.
    pub fn canonical(&self) -> Result<UserId, TokenError> {
        match self {
            Self::Integer(i) => Ok(UserId::new(*i)),
            Self::Float(f) => {
                if !f.is_finite() || f.fract() != 0.0 {
                    Err(unrecognized("non-integral number"))
                } else if f.abs() > MAX_EXACT_FLOAT_INTEGER {
                    Err(unrecognized("floating-point number beyond 2^53"))
                } else {
                    Ok(UserId::new(*f as i64))
                }
            }
            Self::Text(s) => s
                .parse::<UserId>()
                .map_err(|_| unrecognized("non-numeric string")),
        }
    }
}

fn unrecognized(observed: &str) -> TokenError {
    TokenError::UnrecognizedSubjectType {
        observed: observed.to_string(),
    }
}

/// Issues and verifies bearer tokens with a process-wide HMAC secret.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    subject_encoding: SubjectEncoding,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("subject_encoding", &self.subject_encoding)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a token service. An empty secret is refused here so that a
    /// misconfigured process fails at startup rather than on first login.
    pub fn new(secret: &str) -> Result<Self, TokenError> {
        if secret.trim().is_empty() {
            return Err(TokenError::SigningFailure(
                "signing secret is empty".to_string(),
            ));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = HMAC_ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.validate_aud = false;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            subject_encoding: SubjectEncoding::default(),
        })
    }

    /// Choose how `sub` is written in newly issued tokens.
    pub fn with_subject_encoding(mut self, encoding: SubjectEncoding) -> Self {
        self.subject_encoding = encoding;
        self
    }

    pub fn subject_encoding(&self) -> SubjectEncoding {
        self.subject_encoding
    }

    /// Issue a token for `user_id` expiring [`TOKEN_TTL_SECONDS`] from now.
    pub fn issue(&self, user_id: UserId, role: Role) -> Result<String, TokenError> {
        self.issue_at(user_id, role, Utc::now())
    }

    /// Issue a token as if at `issued_at`.
    pub fn issue_at(
        &self,
        user_id: UserId,
        role: Role,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let sub = match self.subject_encoding {
            SubjectEncoding::Number => Value::from(user_id.get()),
            SubjectEncoding::Text => Value::String(user_id.to_string()),
        };
        let claims = IssuedClaims {
            sub,
            role,
            exp: (issued_at + Duration::seconds(TOKEN_TTL_SECONDS)).timestamp(),
            iat: issued_at.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::SigningFailure(e.to_string()))
    }

    /// Verify signature, algorithm family and expiry.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header_segment, claims_segment, _signature] = segments.as_slice() else {
            return Err(TokenError::Malformed(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        // Header and claims are decoded up front so that any base64 failure
        // reported by the verifier below can only come from the signature.
        let header: RawHeader = decode_segment(header_segment, "header")?;
        let alg = header
            .alg
            .ok_or_else(|| TokenError::Malformed("header has no alg".to_string()))?;
        if !HMAC_ALGORITHM_NAMES.contains(&alg.as_str()) {
            return Err(TokenError::UnsupportedAlgorithm(alg));
        }
        let _: Map<String, Value> = decode_segment(claims_segment, "claims")?;

        let data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::Base64(_) => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::UnsupportedAlgorithm(alg.clone())
                }
                _ => TokenError::Malformed(e.to_string()),
            })?;

        // Zero leeway, and `exp == now` already counts as expired.
        let expires_at = data
            .claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| TokenError::Malformed("exp claim is not an integer".to_string()))?;
        if expires_at <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(VerifiedToken {
            algorithm: data.header.alg,
            claims: data.claims,
            expires_at,
        })
    }

    /// Read `sub` from a verified token and normalize it.
    pub fn extract_identity_claim(&self, token: &VerifiedToken) -> Result<UserId, TokenError> {
        let raw = token.raw_subject().ok_or(TokenError::MissingSubjectClaim)?;
        SubjectClaim::from_value(raw)?.canonical()
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(format!("{} is not base64url: {}", what, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("{} is not a JSON object: {}", what, e)))
}
