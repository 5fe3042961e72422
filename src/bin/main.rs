use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use cosmos_auth::auth::{SubjectEncoding, TokenService, UserDirectory, UserStore};
use cosmos_auth::config::{AppConfig, OAuthSources};
use cosmos_auth::oauth::TokenDelivery;
use cosmos_auth::types::{Role, UserId};
use cosmos_auth::{DatabaseConfig, create_connection, ensure_schema};

#[derive(Parser)]
#[command(name = "cosmos-auth")]
#[command(about = "Identity and authentication service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DbArgs {
    #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
    db_url: String,
}

impl DbArgs {
    fn config(self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.db_url,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: String,
        #[command(flatten)]
        db: DbArgs,
        /// HMAC secret for signing bearer tokens
        #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
        jwt_secret: Option<String>,
        /// How `sub` is written in issued tokens (number or text)
        #[arg(long, env = "SUBJECT_ENCODING", default_value = "number")]
        subject_encoding: SubjectEncoding,
        /// Deadline for the account lookup behind authenticated routes
        #[arg(long, env = "LOOKUP_TIMEOUT_MS", default_value_t = 5000)]
        lookup_timeout_ms: u64,
        #[arg(long, env = "GOOGLE_OAUTH_CLIENT_ID")]
        google_client_id: Option<String>,
        #[arg(long, env = "GOOGLE_OAUTH_CLIENT_SECRET", hide_env_values = true)]
        google_client_secret: Option<String>,
        /// Callback URL registered with Google
        #[arg(long, env = "OAUTH_REDIRECT_URL")]
        oauth_redirect_url: Option<String>,
        /// Where the browser lands after OAuth login
        #[arg(long, env = "FRONTEND_URL")]
        frontend_url: Option<String>,
        /// How the token reaches the frontend (query or one-time-code)
        #[arg(long, env = "TOKEN_DELIVERY", default_value = "query")]
        token_delivery: TokenDelivery,
    },
    /// Initialize the database schema
    Init {
        #[command(flatten)]
        db: DbArgs,
    },
    /// Mint a bearer token for an existing account
    IssueToken {
        /// Canonical user id
        user_id: i64,
        #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
        jwt_secret: String,
        #[arg(long, env = "SUBJECT_ENCODING", default_value = "number")]
        subject_encoding: SubjectEncoding,
        /// Skip the account lookup and use this role
        #[arg(long)]
        role: Option<Role>,
        #[command(flatten)]
        db: DbArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cosmos_auth=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            db,
            jwt_secret,
            subject_encoding,
            lookup_timeout_ms,
            google_client_id,
            google_client_secret,
            oauth_redirect_url,
            frontend_url,
            token_delivery,
        } => {
            let config = AppConfig::new(
                jwt_secret,
                OAuthSources {
                    client_id: google_client_id,
                    client_secret: google_client_secret,
                    redirect_url: oauth_redirect_url,
                    frontend_url,
                    delivery: token_delivery,
                },
                db.config(),
            )?
            .with_subject_encoding(subject_encoding)
            .with_lookup_timeout(Duration::from_millis(lookup_timeout_ms));

            info!("Using database url: {}", config.database.url);
            cosmos_auth::server::start_http(config, &bind).await?;
        }
        Commands::Init { db } => {
            let db_config = db.config();
            info!("Initializing schema at {}", db_config.url);
            let conn = create_connection(db_config).await?;
            ensure_schema(&conn).await?;
            println!("Schema is up to date");
        }
        Commands::IssueToken {
            user_id,
            jwt_secret,
            subject_encoding,
            role,
            db,
        } => {
            let tokens = TokenService::new(&jwt_secret)?.with_subject_encoding(subject_encoding);
            let user_id = UserId::new(user_id);

            let role = match role {
                Some(role) => role,
                None => {
                    let conn = create_connection(db.config()).await?;
                    ensure_schema(&conn).await?;
                    let store = UserStore::new(conn);
                    store
                        .find_by_id(user_id, &[])
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("No account with id {}", user_id))?
                        .role
                }
            };

            println!("{}", tokens.issue(user_id, role)?);
        }
    }

    Ok(())
}
