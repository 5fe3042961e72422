//! OAuth login (Google authorization-code flow with PKCE).

pub mod error;
pub mod provider;
pub mod provisioner;
pub mod state;

pub use error::{FlowStep, OAuthError};
pub use provider::{GoogleEndpoints, GoogleProfile, GoogleProvider};
pub use provisioner::{CallbackParams, OAuthProvisioner, TokenDelivery};
