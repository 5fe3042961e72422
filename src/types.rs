//! NewType wrappers for strong typing throughout the identity core.
//!
//! These types prevent accidental mixing of semantically different values
//! (e.g., passing a display name where an email is expected, or a raw
//! database number where a user identifier is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_string!(
    /// Account email address.
    ///
    /// Emails are unique per account and compared exactly as stored; no case
    /// folding is applied, so `A@x.org` and `a@x.org` are different accounts.
    Email
);

newtype_string!(
    /// Name of an OAuth identity provider as it appears in route paths
    /// (e.g., "google" in `/auth/google/login`).
    ProviderName
);

/// Canonical user identifier.
///
/// Every wire encoding of a user's primary key (JSON integer, integral JSON
/// float, decimal string) is normalized to this type before it reaches the
/// user store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Create a new instance.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw integer value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authorization tag carried in tokens and stored on each account.
///
/// Role checks belong to callers; this core only records and transports the
/// tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Lowest privilege; assigned to accounts provisioned through OAuth.
    #[default]
    Volunteer,
    NonprofitAdmin,
    PlatformAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volunteer => "VOLUNTEER",
            Self::NonprofitAdmin => "NONPROFIT_ADMIN",
            Self::PlatformAdmin => "PLATFORM_ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VOLUNTEER" => Ok(Self::Volunteer),
            "NONPROFIT_ADMIN" => Ok(Self::NonprofitAdmin),
            "PLATFORM_ADMIN" => Ok(Self::PlatformAdmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}
