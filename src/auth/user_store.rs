//! Account storage.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::db::Db;
use crate::db::schema::{Association, NewUser, UserRecord};
use crate::types::{Email, Role, UserId};

/// Columns every account lookup projects. Associations are appended on demand.
const BASE_FIELDS: &str = "uid, email, password_hash, first_name, last_name, avatar_url, role, bio";

/// Name of the unique index on `user.email`.
const EMAIL_INDEX: &str = "user_email";

const MAX_CREATE_ATTEMPTS: u64 = 32;
const CONFLICT_BACKOFF_MS: u64 = 2;

/// Store errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The unique email index rejected an insert.
    Duplicate { email: String },
    /// A concurrent transaction won; the write may be retried.
    Conflict(String),
    /// Connection, query or decode failure.
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { email } => write!(f, "An account already exists for {}", email),
            Self::Conflict(msg) => write!(f, "User store write conflict: {}", msg),
            Self::Unavailable(msg) => write!(f, "User store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<surrealdb::Error> for StoreError {
    fn from(e: surrealdb::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Lookup and creation of accounts.
///
/// The resolver and the OAuth provisioner depend on this trait rather than
/// on SurrealDB directly.
pub trait UserDirectory: Send + Sync {
    /// Fetch an account by canonical id, loading the given associations.
    fn find_by_id<'a>(
        &'a self,
        id: UserId,
        associations: &'a [Association],
    ) -> StoreFuture<'a, Option<UserRecord>>;

    /// Fetch an account by exact email.
    fn find_by_email<'a>(&'a self, email: &'a Email) -> StoreFuture<'a, Option<UserRecord>>;

    /// Insert an account, allocating its canonical id.
    fn create(&self, new_user: NewUser) -> StoreFuture<'_, UserRecord>;
}

#[derive(Debug, Clone, Serialize)]
struct UserContent {
    email: String,
    password_hash: Option<String>,
    first_name: String,
    last_name: String,
    avatar_url: Option<String>,
    role: Role,
}

/// SurrealDB-backed [`UserDirectory`].
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    async fn select_by_id(
        &self,
        id: UserId,
        associations: &[Association],
    ) -> Result<Option<UserRecord>, StoreError> {
        let mut fields = BASE_FIELDS.to_string();
        let mut fetch = Vec::new();
        for association in associations {
            fields.push_str(", ");
            fields.push_str(association.field());
            fetch.push(association.field());
        }

        let mut query = format!("SELECT {} FROM user WHERE uid = $uid LIMIT 1", fields);
        if !fetch.is_empty() {
            query.push_str(" FETCH ");
            query.push_str(&fetch.join(", "));
        }

        let mut res = self.db.query(query).bind(("uid", id.get())).await?;
        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    async fn select_by_email(&self, email: &Email) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("SELECT {} FROM user WHERE email = $email LIMIT 1", BASE_FIELDS);
        let mut res = self
            .db
            .query(query)
            .bind(("email", email.as_str().to_string()))
            .await?;
        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    async fn insert(&self, new_user: NewUser) -> Result<UserRecord, StoreError> {
        let email = new_user.email.clone().into_inner();
        let content = UserContent {
            email: email.clone(),
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            avatar_url: new_user.avatar_url,
            role: new_user.role,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_insert(&content).await {
                Err(StoreError::Conflict(msg)) if attempt < MAX_CREATE_ATTEMPTS => {
                    debug!(attempt, error = %msg, "Account insert conflicted, retrying");
                    tokio::time::sleep(Duration::from_millis(CONFLICT_BACKOFF_MS * attempt)).await;
                }
                Ok(user) => {
                    info!(user_id = user.uid, role = %user.role, "Created account");
                    return Ok(user);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Allocate the id from `sequence:user` and create the account in one
    /// transaction. Conflicting commits surface as [`StoreError::Conflict`].
    async fn try_insert(&self, content: &UserContent) -> Result<UserRecord, StoreError> {
        let query = format!(
            "BEGIN TRANSACTION;
             LET $next = (UPSERT ONLY sequence:user SET value = (value OR 0) + 1).value;
             CREATE ONLY user SET
                uid = $next,
                email = $content.email,
                password_hash = $content.password_hash,
                first_name = $content.first_name,
                last_name = $content.last_name,
                avatar_url = $content.avatar_url,
                role = $content.role
             RETURN {};
             COMMIT TRANSACTION;",
            BASE_FIELDS
        );

        let mut res = self
            .db
            .query(query)
            .bind(("content", content.clone()))
            .await
            .map_err(|e| classify_write_error(&content.email, e))?;

        // The failing statement carries the real cause; the rest only
        // report that the transaction was cancelled.
        let errors = res.take_errors();
        if !errors.is_empty() {
            let mut failures: Vec<_> = errors.into_iter().collect();
            failures.sort_by_key(|(index, _)| *index);
            let classified: Vec<StoreError> = failures
                .into_iter()
                .map(|(_, e)| classify_write_error(&content.email, e))
                .collect();
            let first = classified
                .iter()
                .find(|e| !matches!(e, StoreError::Unavailable(_)))
                .or_else(|| classified.first())
                .cloned();
            return Err(first.unwrap_or_else(|| {
                StoreError::Unavailable("account insert failed".to_string())
            }));
        }

        for index in (0..res.num_statements()).rev() {
            let created: Option<UserRecord> = res.take(index)?;
            if let Some(user) = created {
                return Ok(user);
            }
        }
        Err(StoreError::Unavailable("create returned no record".to_string()))
    }
}

/// Map a write failure to a store error. Only the email index produces
/// [`StoreError::Duplicate`]; any other unique index violation is a fault.
fn classify_write_error(email: &str, e: surrealdb::Error) -> StoreError {
    let message = e.to_string();
    if message.contains("already contains") && message.contains(EMAIL_INDEX) {
        StoreError::Duplicate {
            email: email.to_string(),
        }
    } else if message.contains("read or write conflict") || message.contains("can be retried") {
        StoreError::Conflict(message)
    } else {
        StoreError::Unavailable(message)
    }
}

impl UserDirectory for UserStore {
    fn find_by_id<'a>(
        &'a self,
        id: UserId,
        associations: &'a [Association],
    ) -> StoreFuture<'a, Option<UserRecord>> {
        Box::pin(self.select_by_id(id, associations))
    }

    fn find_by_email<'a>(&'a self, email: &'a Email) -> StoreFuture<'a, Option<UserRecord>> {
        Box::pin(self.select_by_email(email))
    }

    fn create(&self, new_user: NewUser) -> StoreFuture<'_, UserRecord> {
        Box::pin(self.insert(new_user))
    }
}

/// Return the account for `new_user.email`, creating it if absent.
///
/// The boolean is `true` when this call created the account. An existing
/// account is returned untouched. If a concurrent caller wins the unique
/// email race, or the insert keeps conflicting, the loser falls back to a
/// lookup.
pub async fn find_or_create_by_email(
    directory: &dyn UserDirectory,
    new_user: NewUser,
) -> Result<(UserRecord, bool), StoreError> {
    if let Some(existing) = directory.find_by_email(&new_user.email).await? {
        return Ok((existing, false));
    }

    let email = new_user.email.clone();
    match directory.create(new_user).await {
        Ok(created) => Ok((created, true)),
        Err(StoreError::Duplicate { .. } | StoreError::Conflict(_)) => directory
            .find_by_email(&email)
            .await?
            .map(|existing| (existing, false))
            .ok_or_else(|| {
                StoreError::Unavailable(format!("account for {} vanished after conflict", email))
            }),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use crate::db::schema::{CauseRecord, SkillRecord};

    pub(crate) async fn setup_test_store() -> UserStore {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        UserStore::new(db)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: Email::new(email),
            password_hash: Some("$argon2id$placeholder".to_string()),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            avatar_url: None,
            role: Role::NonprofitAdmin,
        }
    }

    #[tokio::test]
    async fn test_create_allocates_sequential_ids() {
        let store = setup_test_store().await;

        let a = store.create(new_user("a@example.org")).await.unwrap();
        let b = store.create(new_user("b@example.org")).await.unwrap();

        assert_eq!(a.uid, 1);
        assert_eq!(b.uid, 2);
        assert_eq!(a.role, Role::NonprofitAdmin);
        assert!(a.has_password());
    }

    #[tokio::test]
    async fn test_find_by_id_and_email() {
        let store = setup_test_store().await;
        let created = store.create(new_user("find@example.org")).await.unwrap();

        let by_id = store.find_by_id(created.id(), &[]).await.unwrap().unwrap();
        assert_eq!(by_id.email, "find@example.org");
        assert_eq!(by_id.first_name, "Ada");

        let by_email = store
            .find_by_email(&Email::new("find@example.org"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.uid, created.uid);

        assert!(store.find_by_id(UserId::new(999), &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_sensitive() {
        let store = setup_test_store().await;
        store.create(new_user("Case@example.org")).await.unwrap();

        assert!(store
            .find_by_email(&Email::new("case@example.org"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_reported() {
        let store = setup_test_store().await;
        store.create(new_user("dup@example.org")).await.unwrap();

        let err = store.create(new_user("dup@example.org")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Duplicate {
                email: "dup@example.org".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_uid_collision_is_not_reported_as_duplicate_email() {
        let store = setup_test_store().await;
        store
            .db()
            .query("CREATE user CONTENT { uid: 1, email: 'seeded@example.org' }")
            .await
            .unwrap()
            .check()
            .unwrap();

        let err = store.create(new_user("fresh@example.org")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)), "got {:?}", err);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_creates_with_distinct_emails_all_succeed() {
        let store = setup_test_store().await;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.create(new_user(&format!("crowd{}@example.org", i))).await
                })
            })
            .collect();

        let mut uids = Vec::new();
        for handle in handles {
            uids.push(handle.await.unwrap().unwrap().uid);
        }
        uids.sort_unstable();
        assert_eq!(uids, (1..=16).collect::<Vec<i64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_first_logins_share_one_account() {
        let store = setup_test_store().await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let incoming = NewUser::external(
                        Email::new("same@example.org"),
                        "First".to_string(),
                        "Login".to_string(),
                    );
                    find_or_create_by_email(&store, incoming).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        let uid = results[0].0.uid;
        assert!(results.iter().all(|(user, _)| user.uid == uid));
        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);

        let mut res = store
            .db()
            .query("SELECT count() AS n FROM user GROUP ALL")
            .await
            .unwrap();
        let count: Option<i64> = res.take((0, "n")).unwrap();
        assert_eq!(count, Some(1));
    }

    #[tokio::test]
    async fn test_find_by_id_loads_requested_associations() {
        let store = setup_test_store().await;
        let user = store.create(new_user("assoc@example.org")).await.unwrap();

        store
            .db()
            .query(
                "CREATE skill:rust CONTENT { name: 'Rust', category: 'Engineering' };
                 CREATE cause:literacy CONTENT { name: 'Literacy', description: 'Reading programs' };
                 UPDATE user SET skills += skill:rust, causes += cause:literacy WHERE uid = $uid;",
            )
            .bind(("uid", user.uid))
            .await
            .unwrap()
            .check()
            .unwrap();

        let full = store
            .find_by_id(user.id(), &Association::all())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            full.skills,
            vec![SkillRecord {
                name: "Rust".to_string(),
                category: Some("Engineering".to_string()),
            }]
        );
        assert_eq!(
            full.causes,
            vec![CauseRecord {
                name: "Literacy".to_string(),
                description: Some("Reading programs".to_string()),
            }]
        );

        let skills_only = store
            .find_by_id(user.id(), &[Association::Skills])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(skills_only.skills.len(), 1);
        assert!(skills_only.causes.is_empty());
    }

    #[tokio::test]
    async fn test_find_or_create_returns_existing_untouched() {
        let store = setup_test_store().await;
        let original = store.create(new_user("keep@example.org")).await.unwrap();

        let incoming = NewUser::external(
            Email::new("keep@example.org"),
            "Other".to_string(),
            "Name".to_string(),
        );
        let (user, created) = find_or_create_by_email(&store, incoming).await.unwrap();

        assert!(!created);
        assert_eq!(user.uid, original.uid);
        assert_eq!(user.first_name, "Ada");
        assert_eq!(user.role, Role::NonprofitAdmin);
    }

    /// Simulates losing the creation race: the first email lookup misses
    /// even though another caller has already inserted the account.
    struct StaleFirstLookup {
        inner: UserStore,
        missed: std::sync::atomic::AtomicBool,
    }

    impl UserDirectory for StaleFirstLookup {
        fn find_by_id<'a>(
            &'a self,
            id: UserId,
            associations: &'a [Association],
        ) -> StoreFuture<'a, Option<UserRecord>> {
            self.inner.find_by_id(id, associations)
        }

        fn find_by_email<'a>(&'a self, email: &'a Email) -> StoreFuture<'a, Option<UserRecord>> {
            if !self.missed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Box::pin(async { Ok(None) });
            }
            self.inner.find_by_email(email)
        }

        fn create(&self, new_user: NewUser) -> StoreFuture<'_, UserRecord> {
            self.inner.create(new_user)
        }
    }

    #[tokio::test]
    async fn test_lost_creation_race_degrades_to_lookup() {
        let store = setup_test_store().await;
        let winner = store.create(new_user("race@example.org")).await.unwrap();

        let loser = StaleFirstLookup {
            inner: store.clone(),
            missed: std::sync::atomic::AtomicBool::new(false),
        };
        let incoming = NewUser::external(
            Email::new("race@example.org"),
            "Race".to_string(),
            "Condition".to_string(),
        );
        let (user, created) = find_or_create_by_email(&loser, incoming).await.unwrap();

        assert!(!created);
        assert_eq!(user.uid, winner.uid);

        let mut res = store
            .db()
            .query("SELECT count() AS total FROM user WHERE email = 'race@example.org' GROUP ALL")
            .await
            .unwrap();
        let total: Option<i64> = res.take((0, "total")).unwrap();
        assert_eq!(total, Some(1));
    }

    #[tokio::test]
    async fn test_find_or_create_creates_external_account() {
        let store = setup_test_store().await;
        let incoming = NewUser::external(
            Email::new("new@example.org"),
            "Grace".to_string(),
            "Hopper".to_string(),
        );

        let (user, created) = find_or_create_by_email(&store, incoming).await.unwrap();
        assert!(created);
        assert_eq!(user.role, Role::Volunteer);
        assert!(!user.has_password());
        assert_eq!(user.last_name, "Hopper");
    }
}
