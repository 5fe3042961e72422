use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "cosmos".to_string()),
            database: env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "identity".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        // Accounts. `uid` is the canonical integer identifier carried in tokens.
        "DEFINE TABLE IF NOT EXISTS user SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS uid ON TABLE user TYPE int;
         DEFINE FIELD IF NOT EXISTS email ON TABLE user TYPE string;
         DEFINE FIELD IF NOT EXISTS password_hash ON TABLE user TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS first_name ON TABLE user TYPE string DEFAULT '';
         DEFINE FIELD IF NOT EXISTS last_name ON TABLE user TYPE string DEFAULT '';
         DEFINE FIELD IF NOT EXISTS avatar_url ON TABLE user TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS role ON TABLE user TYPE string DEFAULT 'VOLUNTEER';
         DEFINE FIELD IF NOT EXISTS bio ON TABLE user TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS skills ON TABLE user TYPE array<record<skill>> DEFAULT [];
         DEFINE FIELD IF NOT EXISTS causes ON TABLE user TYPE array<record<cause>> DEFAULT [];
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE user DEFAULT time::now();
         DEFINE FIELD IF NOT EXISTS updated_at ON TABLE user VALUE time::now();",

        "DEFINE TABLE IF NOT EXISTS skill SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS name ON TABLE skill TYPE string;
         DEFINE FIELD IF NOT EXISTS category ON TABLE skill TYPE option<string>;",

        "DEFINE TABLE IF NOT EXISTS cause SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS name ON TABLE cause TYPE string;
         DEFINE FIELD IF NOT EXISTS description ON TABLE cause TYPE option<string>;",

        // Monotonic counters (one record per allocated id space).
        "DEFINE TABLE IF NOT EXISTS sequence SCHEMALESS;",

        // The email index arbitrates concurrent first logins.
        "DEFINE INDEX IF NOT EXISTS user_uid ON TABLE user COLUMNS uid UNIQUE;
         DEFINE INDEX IF NOT EXISTS user_email ON TABLE user COLUMNS email UNIQUE;
         DEFINE INDEX IF NOT EXISTS skill_name ON TABLE skill COLUMNS name UNIQUE;
         DEFINE INDEX IF NOT EXISTS cause_name ON TABLE cause COLUMNS name UNIQUE;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
