//! HTTP server wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::api::{AppState, create_router};
use crate::auth::{AccountService, IdentityResolver, TokenService, UserDirectory, UserStore};
use crate::config::AppConfig;
use crate::db::{Db, create_connection, ensure_schema};
use crate::oauth::{GoogleEndpoints, GoogleProvider, OAuthProvisioner};

/// How often expired OAuth flows and handoff codes are swept.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Build the shared application state from validated configuration.
pub fn build_state(config: &AppConfig, db: Db) -> Result<AppState> {
    let tokens = Arc::new(
        TokenService::new(&config.jwt_secret)?.with_subject_encoding(config.subject_encoding),
    );
    let directory: Arc<dyn UserDirectory> = Arc::new(UserStore::new(db));

    let oauth = match &config.oauth {
        Some(settings) => {
            let provider = GoogleProvider::new(
                settings.client_id.clone(),
                settings.client_secret.clone(),
                settings.redirect_url.clone(),
                GoogleEndpoints::google()?,
            )?;
            let provisioner = OAuthProvisioner::new(
                provider,
                tokens.clone(),
                directory.clone(),
                settings.frontend_url.clone(),
            )
            .with_delivery(settings.delivery);
            Some(Arc::new(provisioner))
        }
        None => None,
    };

    let resolver = IdentityResolver::new(tokens.clone(), directory.clone())
        .with_lookup_timeout(config.lookup_timeout);

    Ok(AppState {
        tokens: tokens.clone(),
        resolver: Arc::new(resolver),
        accounts: Arc::new(AccountService::new(tokens, directory)),
        oauth,
    })
}

/// Connect to the store, apply the schema, and serve until shutdown.
pub async fn start_http(config: AppConfig, bind: &str) -> Result<()> {
    let db = create_connection(config.database.clone()).await?;
    ensure_schema(&db).await?;

    let state = build_state(&config, db)?;

    if let Some(oauth) = state.oauth.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = oauth.cleanup_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired OAuth entries");
                }
            }
        });
    }

    let oauth_enabled = state.oauth.is_some();
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    if oauth_enabled {
        tracing::info!("Identity server listening on http://{} (oauth enabled)", bind);
    } else {
        tracing::info!("Identity server listening on http://{} (password login only)", bind);
    }

    axum::serve(listener, router).await?;

    Ok(())
}
