pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::libs::backend::backend_traits::{
    AuthApi, BackendError, ChangeEvent, ChangeFilter, ChangeKind, MessageApi, PostApi,
    ProfileApi, RealtimeApi, StoryApi, Subscription,
};
use crate::libs::backend::records::{
    AuthEvent, AuthSession, AuthUser, AuthorRecord, LikeRecord, MessageRecord, NewMessage,
    NewPost, NewStory, PostRecord, ProfileRecord, ProfileUpdate, SignUpOutcome, SignUpRequest,
    StoryRecord, UserMetadata,
};
use crate::libs::core::error::AuthError;

const CHANGE_BUFFER_SIZE: usize = 256;
const SUBSCRIPTION_BUFFER_SIZE: usize = 64;
const AUTH_EVENT_BUFFER_SIZE: usize = 16;
const POOL_SIZE: u32 = 8;

const POST_SELECT: &str = "SELECT p.id, p.user_id, p.content, p.type, p.media_url, p.title,
        p.language, p.comments, p.shares, p.created_at,
        pr.id AS profile_id, pr.full_name, pr.avatar_url, pr.username,
        (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) AS likes
    FROM posts p LEFT JOIN profiles pr ON pr.id = p.user_id";

const STORY_SELECT: &str = "SELECT s.id, s.user_id, s.media_url, s.expires_at,
        pr.id AS profile_id, pr.full_name, pr.avatar_url, pr.username
    FROM stories s LEFT JOIN profiles pr ON pr.id = s.user_id";

#[derive(Clone, Debug)]
pub struct SqliteBackendOptions {
    /// Sign-ups stay unconfirmed until the emailed code is verified.
    pub require_email_confirmation: bool,
    pub code_lifetime: chrono::Duration,
    pub session_lifetime: chrono::Duration,
}

impl Default for SqliteBackendOptions {
    fn default() -> Self {
        Self {
            require_email_confirmation: false,
            code_lifetime: chrono::Duration::hours(1),
            session_lifetime: chrono::Duration::hours(1),
        }
    }
}

struct SharedDatabase {
    pool: Pool<SqliteConnectionManager>,
    changes: broadcast::Sender<ChangeEvent>,
    options: SqliteBackendOptions,
}

/// Self-contained backend on a local sqlite file. Implements the same contract as
/// the hosted service, including change notifications and e-mail codes (readable
/// through [`SqliteBackend::pending_code`] in place of a mailbox).
pub struct SqliteBackend {
    shared: Arc<SharedDatabase>,
    session: RwLock<Option<AuthSession>>,
    auth_events: broadcast::Sender<AuthEvent>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>, options: SqliteBackendOptions) -> Result<Self, BackendError> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|connection| {
            connection.busy_timeout(Duration::from_secs(5))?;
            connection.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;

        let mut connection = pool.get()?;
        schema::migrate(&mut connection)?;
        info!(path = %path.as_ref().display(), "local backend ready");

        let (changes, _) = broadcast::channel(CHANGE_BUFFER_SIZE);
        Ok(Self::with_shared(Arc::new(SharedDatabase {
            pool,
            changes,
            options,
        })))
    }

    fn with_shared(shared: Arc<SharedDatabase>) -> Self {
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_BUFFER_SIZE);
        Self {
            shared,
            session: RwLock::new(None),
            auth_events,
        }
    }

    /// Another signed-out client on the same database and change feed, the way a
    /// second device talks to the same hosted project.
    pub fn new_client(&self) -> Self {
        Self::with_shared(Arc::clone(&self.shared))
    }

    /// The outstanding verification code for `email`, if one was sent.
    pub async fn pending_code(&self, email: &str) -> Result<Option<String>, BackendError> {
        let email = normalize_email(email);
        self.run(move |connection| {
            Ok(connection
                .query_row(
                    "SELECT code FROM verification_codes WHERE email = ?1",
                    params![email],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, BackendError> + Send + 'static,
    {
        let pool = self.shared.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get()?;
            op(&mut *connection)
        })
        .await?
    }

    fn publish_change<T: Serialize>(&self, table: &str, record: &T) {
        match serde_json::to_value(record) {
            Ok(record) => {
                // No receivers is fine.
                let _ = self.shared.changes.send(ChangeEvent {
                    table: table.to_string(),
                    kind: ChangeKind::Insert,
                    record,
                });
            }
            Err(e) => warn!(table, error = %e, "could not encode change event"),
        }
    }

    async fn require_user(&self, user_id: &str) -> Result<AuthSession, BackendError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or(BackendError::NotAuthenticated)?;
        if session.user.id != user_id {
            return Err(BackendError::Forbidden(format!(
                "row belongs to {} but session is {}",
                user_id, session.user.id
            )));
        }
        Ok(session)
    }

    async fn start_session(&self, user: AuthUser) -> AuthSession {
        let now = Utc::now();
        let session = AuthSession {
            access_token: Uuid::now_v7().to_string(),
            refresh_token: Uuid::now_v7().to_string(),
            expires_at: Some((now + self.shared.options.session_lifetime).timestamp()),
            user,
        };
        *self.session.write().await = Some(session.clone());
        let _ = self.auth_events.send(AuthEvent::SignedIn(session.clone()));
        session
    }

    async fn issue_code(&self, email: String) -> Result<(), BackendError> {
        let expires_at = to_micros(Utc::now() + self.shared.options.code_lifetime);
        let code = generate_code();
        self.run(move |connection| {
            connection.execute(
                "INSERT OR REPLACE INTO verification_codes (email, code, expires_at)
                 VALUES (?1, ?2, ?3)",
                params![email, code, expires_at],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AuthApi for SqliteBackend {
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError> {
        Ok(self.session.read().await.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let email = normalize_email(email);
        let password = password.to_string();
        let user = self
            .run(move |connection| {
                let account = connection
                    .query_row(
                        "SELECT user_id, password_hash, salt, full_name, confirmed
                         FROM accounts WHERE email = ?1",
                        params![email],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, Option<String>>(3)?,
                                row.get::<_, bool>(4)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((user_id, password_hash, salt, full_name, confirmed)) = account else {
                    return Err(AuthError::InvalidCredentials.into());
                };
                if hash_password(&salt, &password) != password_hash {
                    return Err(AuthError::InvalidCredentials.into());
                }
                if !confirmed {
                    return Err(AuthError::EmailNotConfirmed.into());
                }
                Ok(auth_user(user_id, email, full_name))
            })
            .await?;

        debug!(user_id = %user.id, "signed in locally");
        Ok(self.start_session(user).await)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, BackendError> {
        let email = normalize_email(&request.email);
        let full_name = request.full_name.trim().to_string();
        let salt = Uuid::now_v7().to_string();
        let password_hash = hash_password(&salt, &request.password);
        let confirmed = !self.shared.options.require_email_confirmation;
        let user_id = Uuid::now_v7().to_string();
        let now = to_micros(Utc::now());

        let user = {
            let email = email.clone();
            let user_id = user_id.clone();
            self.run(move |connection| {
                let tx = connection.transaction()?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM accounts WHERE email = ?1)",
                    params![email],
                    |row| row.get(0),
                )?;
                if exists {
                    return Err(AuthError::UserAlreadyExists(email).into());
                }

                tx.execute(
                    "INSERT INTO accounts (user_id, email, password_hash, salt, full_name, confirmed, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![user_id, email, password_hash, salt, full_name, confirmed, now],
                )?;
                // The hosted project creates the profile row from a sign-up trigger.
                tx.execute(
                    "INSERT OR IGNORE INTO profiles (id, full_name, updated_at) VALUES (?1, ?2, ?3)",
                    params![user_id, full_name, now],
                )?;
                tx.commit()?;
                Ok(auth_user(user_id, email, Some(full_name)))
            })
            .await?
        };

        if confirmed {
            return Ok(SignUpOutcome::SignedIn(self.start_session(user).await));
        }

        self.issue_code(email.clone()).await?;
        info!(user_id = %user_id, "sign-up awaiting email confirmation");
        Ok(SignUpOutcome::ConfirmationRequired { email })
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthSession, BackendError> {
        let email = normalize_email(email);
        let code = code.trim().to_string();
        let now = to_micros(Utc::now());

        let user = self
            .run(move |connection| {
                let tx = connection.transaction()?;
                let stored = tx
                    .query_row(
                        "SELECT code, expires_at FROM verification_codes WHERE email = ?1",
                        params![email],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?;

                match stored {
                    Some((expected, expires_at)) if expected == code && expires_at > now => {}
                    _ => return Err(AuthError::InvalidCode.into()),
                }

                tx.execute(
                    "UPDATE accounts SET confirmed = true WHERE email = ?1",
                    params![email],
                )?;
                tx.execute(
                    "DELETE FROM verification_codes WHERE email = ?1",
                    params![email],
                )?;
                let (user_id, full_name) = tx.query_row(
                    "SELECT user_id, full_name FROM accounts WHERE email = ?1",
                    params![email],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                )?;
                tx.commit()?;
                Ok(auth_user(user_id, email, full_name))
            })
            .await?;

        Ok(self.start_session(user).await)
    }

    async fn resend_otp(&self, email: &str) -> Result<(), BackendError> {
        let email = normalize_email(email);
        let pending = {
            let email = email.clone();
            self.run(move |connection| {
                let confirmed: Option<bool> = connection
                    .query_row(
                        "SELECT confirmed FROM accounts WHERE email = ?1",
                        params![email],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(confirmed == Some(false))
            })
            .await?
        };

        // Unknown and already confirmed addresses succeed silently.
        if pending {
            self.issue_code(email).await?;
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let previous = self.session.write().await.take();
        if previous.is_some() {
            let _ = self.auth_events.send(AuthEvent::SignedOut);
        }
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }
}

#[async_trait]
impl ProfileApi for SqliteBackend {
    async fn load_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, BackendError> {
        let user_id = user_id.to_string();
        self.run(move |connection| load_profile(connection, &user_id))
            .await
    }

    async fn list_profiles_except(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProfileRecord>, BackendError> {
        let user_id = user_id.to_string();
        self.run(move |connection| {
            let mut stmt = connection.prepare(
                "SELECT id, full_name, avatar_url, username, bio, phone
                 FROM profiles WHERE id != ?1 ORDER BY full_name COLLATE NOCASE, id",
            )?;
            let profiles = stmt
                .query_map(params![user_id], profile_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(profiles)
        })
        .await
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<ProfileRecord, BackendError> {
        self.require_user(user_id).await?;
        let user_id = user_id.to_string();
        let update = update.clone();
        let now = to_micros(Utc::now());

        self.run(move |connection| {
            connection.execute(
                "INSERT INTO profiles (id, full_name, avatar_url, username, bio, phone, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    full_name = COALESCE(excluded.full_name, profiles.full_name),
                    avatar_url = COALESCE(excluded.avatar_url, profiles.avatar_url),
                    username = COALESCE(excluded.username, profiles.username),
                    bio = COALESCE(excluded.bio, profiles.bio),
                    phone = COALESCE(excluded.phone, profiles.phone),
                    updated_at = excluded.updated_at",
                params![
                    user_id,
                    update.full_name,
                    update.avatar_url,
                    update.username,
                    update.bio,
                    update.phone,
                    now
                ],
            )?;
            load_profile(connection, &user_id)?.ok_or(BackendError::NotFound(user_id))
        })
        .await
    }
}

#[async_trait]
impl PostApi for SqliteBackend {
    async fn list_posts(&self) -> Result<Vec<PostRecord>, BackendError> {
        self.run(|connection| {
            let mut stmt = connection
                .prepare(&format!("{} ORDER BY p.created_at DESC, p.id DESC", POST_SELECT))?;
            let posts = stmt
                .query_map([], post_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(posts)
        })
        .await
    }

    async fn insert_post(&self, post: &NewPost) -> Result<PostRecord, BackendError> {
        self.require_user(&post.user_id).await?;
        let post = post.clone();
        let id = Uuid::now_v7().to_string();
        let now = to_micros(Utc::now());

        let record = self
            .run(move |connection| {
                connection.execute(
                    "INSERT INTO posts (id, user_id, content, type, media_url, title, language, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        id,
                        post.user_id,
                        post.content,
                        post.kind,
                        post.media_url,
                        post.title,
                        post.language,
                        now
                    ],
                )?;
                let record = connection.query_row(
                    &format!("{} WHERE p.id = ?1", POST_SELECT),
                    params![id],
                    post_from_row,
                )?;
                Ok(record)
            })
            .await?;

        self.publish_change("posts", &record);
        Ok(record)
    }

    async fn like_post(&self, like: &LikeRecord) -> Result<(), BackendError> {
        self.require_user(&like.user_id).await?;
        let like = like.clone();
        let now = to_micros(Utc::now());
        self.run(move |connection| {
            connection.execute(
                "INSERT OR IGNORE INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![like.post_id, like.user_id, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn unlike_post(&self, like: &LikeRecord) -> Result<(), BackendError> {
        self.require_user(&like.user_id).await?;
        let like = like.clone();
        self.run(move |connection| {
            connection.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                params![like.post_id, like.user_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_likes(&self, post_id: &str) -> Result<u32, BackendError> {
        let post_id = post_id.to_string();
        self.run(move |connection| {
            Ok(connection.query_row(
                "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
                params![post_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn liked_post_ids(&self, user_id: &str) -> Result<Vec<String>, BackendError> {
        let user_id = user_id.to_string();
        self.run(move |connection| {
            let mut stmt =
                connection.prepare("SELECT post_id FROM post_likes WHERE user_id = ?1")?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl StoryApi for SqliteBackend {
    async fn list_active_stories(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoryRecord>, BackendError> {
        let now = to_micros(now);
        self.run(move |connection| {
            let mut stmt = connection.prepare(&format!(
                "{} WHERE s.expires_at > ?1 ORDER BY s.created_at DESC, s.id DESC",
                STORY_SELECT
            ))?;
            let stories = stmt
                .query_map(params![now], story_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(stories)
        })
        .await
    }

    async fn insert_story(&self, story: &NewStory) -> Result<StoryRecord, BackendError> {
        self.require_user(&story.user_id).await?;
        let story = story.clone();
        let id = Uuid::now_v7().to_string();
        let now = to_micros(Utc::now());

        let record = self
            .run(move |connection| {
                connection.execute(
                    "INSERT INTO stories (id, user_id, media_url, expires_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id,
                        story.user_id,
                        story.media_url,
                        to_micros(story.expires_at),
                        now
                    ],
                )?;
                let record = connection.query_row(
                    &format!("{} WHERE s.id = ?1", STORY_SELECT),
                    params![id],
                    story_from_row,
                )?;
                Ok(record)
            })
            .await?;

        self.publish_change("stories", &record);
        Ok(record)
    }
}

#[async_trait]
impl MessageApi for SqliteBackend {
    async fn list_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<MessageRecord>, BackendError> {
        let (user_a, user_b) = (user_a.to_string(), user_b.to_string());
        self.run(move |connection| {
            let mut stmt = connection.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC",
            )?;
            let messages = stmt
                .query_map(params![user_a, user_b], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageRecord, BackendError> {
        self.require_user(&message.sender_id).await?;
        let record = MessageRecord {
            id: Uuid::now_v7().to_string(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            created_at: stored_now(),
        };

        let row = record.clone();
        self.run(move |connection| {
            connection.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.id,
                    row.sender_id,
                    row.receiver_id,
                    row.content,
                    to_micros(row.created_at)
                ],
            )?;
            Ok(())
        })
        .await?;

        self.publish_change("messages", &record);
        Ok(record)
    }
}

#[async_trait]
impl RealtimeApi for SqliteBackend {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, BackendError> {
        let mut changes = self.shared.changes.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER_SIZE);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_filter = filter.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = changes.recv() => event,
                };
                match event {
                    Ok(event) if task_filter.matches(&event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(table = %task_filter.table, skipped, "change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(table = %task_filter.table, "local subscription closed");
        });

        Ok(Subscription::new(filter, rx, cancel))
    }
}

fn load_profile(
    connection: &Connection,
    user_id: &str,
) -> Result<Option<ProfileRecord>, BackendError> {
    Ok(connection
        .query_row(
            "SELECT id, full_name, avatar_url, username, bio, phone FROM profiles WHERE id = ?1",
            params![user_id],
            profile_from_row,
        )
        .optional()?)
}

fn profile_from_row(row: &Row) -> rusqlite::Result<ProfileRecord> {
    Ok(ProfileRecord {
        id: row.get("id")?,
        full_name: row.get("full_name")?,
        avatar_url: row.get("avatar_url")?,
        username: row.get("username")?,
        bio: row.get("bio")?,
        phone: row.get("phone")?,
    })
}

fn author_from_row(row: &Row) -> rusqlite::Result<Option<AuthorRecord>> {
    let profile_id: Option<String> = row.get("profile_id")?;
    if profile_id.is_none() {
        return Ok(None);
    }
    Ok(Some(AuthorRecord {
        full_name: row.get("full_name")?,
        avatar_url: row.get("avatar_url")?,
        username: row.get("username")?,
    }))
}

fn post_from_row(row: &Row) -> rusqlite::Result<PostRecord> {
    Ok(PostRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        kind: row.get("type")?,
        media_url: row.get("media_url")?,
        title: row.get("title")?,
        language: row.get("language")?,
        comments: row.get("comments")?,
        shares: row.get("shares")?,
        created_at: from_micros(row.get("created_at")?),
        author: author_from_row(row)?,
        likes: row.get("likes")?,
    })
}

fn story_from_row(row: &Row) -> rusqlite::Result<StoryRecord> {
    Ok(StoryRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        media_url: row.get("media_url")?,
        expires_at: from_micros(row.get("expires_at")?),
        author: author_from_row(row)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get("id")?,
        sender_id: row.get("sender_id")?,
        receiver_id: row.get("receiver_id")?,
        content: row.get("content")?,
        created_at: from_micros(row.get("created_at")?),
    })
}

fn auth_user(user_id: String, email: String, full_name: Option<String>) -> AuthUser {
    AuthUser {
        id: user_id,
        email: Some(email),
        user_metadata: UserMetadata {
            full_name,
            avatar_url: None,
        },
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

/// Current time at the precision the tables store.
fn stored_now() -> DateTime<Utc> {
    from_micros(to_micros(Utc::now()))
}
