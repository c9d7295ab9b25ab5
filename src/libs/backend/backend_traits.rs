use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::libs::backend::records::{
    AuthEvent, AuthSession, LikeRecord, MessageRecord, NewMessage, NewPost, NewStory,
    PostRecord, ProfileRecord, ProfileUpdate, SignUpOutcome, SignUpRequest, StoryRecord,
};
use crate::libs::core::error::AuthError;

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError>;
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, BackendError>;
    async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthSession, BackendError>;
    async fn resend_otp(&self, email: &str) -> Result<(), BackendError>;
    async fn sign_out(&self) -> Result<(), BackendError>;
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn load_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, BackendError>;
    async fn list_profiles_except(&self, user_id: &str)
        -> Result<Vec<ProfileRecord>, BackendError>;
    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<ProfileRecord, BackendError>;
}

#[async_trait]
pub trait PostApi: Send + Sync {
    /// Every post, newest first, with author profile fields and like counts.
    async fn list_posts(&self) -> Result<Vec<PostRecord>, BackendError>;
    async fn insert_post(&self, post: &NewPost) -> Result<PostRecord, BackendError>;
    async fn like_post(&self, like: &LikeRecord) -> Result<(), BackendError>;
    async fn unlike_post(&self, like: &LikeRecord) -> Result<(), BackendError>;
    async fn count_likes(&self, post_id: &str) -> Result<u32, BackendError>;
    async fn liked_post_ids(&self, user_id: &str) -> Result<Vec<String>, BackendError>;
}

#[async_trait]
pub trait StoryApi: Send + Sync {
    async fn list_active_stories(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoryRecord>, BackendError>;
    async fn insert_story(&self, story: &NewStory) -> Result<StoryRecord, BackendError>;
}

#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Messages exchanged between the two users in either direction, oldest first.
    async fn list_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<MessageRecord>, BackendError>;
    async fn insert_message(&self, message: &NewMessage) -> Result<MessageRecord, BackendError>;
}

#[async_trait]
pub trait RealtimeApi: Send + Sync {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, BackendError>;
}

pub trait Backend: AuthApi + ProfileApi + PostApi + StoryApi + MessageApi + RealtimeApi {}

impl<T> Backend for T where T: AuthApi + ProfileApi + PostApi + StoryApi + MessageApi + RealtimeApi {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// What a realtime subscription listens to: one table, one change kind and at most
/// one `column = value` condition (the same restriction the hosted realtime service has).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: String,
    pub kind: ChangeKind,
    pub column_eq: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn inserts(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            column_eq: None,
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.column_eq = Some((column.into(), value.into()));
        self
    }

    /// Server-side filter expression, e.g. `sender_id=eq.42`.
    pub fn filter_expression(&self) -> Option<String> {
        self.column_eq
            .as_ref()
            .map(|(column, value)| format!("{}=eq.{}", column, value))
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || event.kind != self.kind {
            return false;
        }
        match &self.column_eq {
            None => true,
            Some((column, expected)) => match event.record.get(column) {
                Some(Value::String(actual)) => actual == expected,
                Some(Value::Number(actual)) => actual.to_string() == *expected,
                _ => false,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Value,
}

impl ChangeEvent {
    pub fn record_as<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
        Ok(serde_json::from_value(self.record.clone())?)
    }
}

/// A live change feed. Dropping or unsubscribing stops delivery and releases the
/// backend-side listener.
#[derive(Debug)]
pub struct Subscription {
    filter: ChangeFilter,
    events: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        filter: ChangeFilter,
        events: mpsc::Receiver<ChangeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            filter,
            events,
            cancel,
        }
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Next matching event, or `None` once unsubscribed or the feed closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                event = self.events.recv() => event?,
            };
            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("Sqlite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ConnectionPool Error: {0}")]
    ConnectionPool(#[from] r2d2::Error),
    #[error("Serialisation Error: {0}")]
    Serialisation(#[from] serde_json::Error),
    #[error("Realtime Error: {0}")]
    Realtime(String),
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Not permitted: {0}")]
    Forbidden(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(table: &str, record: Value) -> ChangeEvent {
        ChangeEvent {
            table: table.to_string(),
            kind: ChangeKind::Insert,
            record,
        }
    }

    #[test]
    fn unfiltered_insert_matches_whole_table() {
        let filter = ChangeFilter::inserts("posts");
        assert!(filter.matches(&insert("posts", json!({"id": "1"}))));
        assert!(!filter.matches(&insert("messages", json!({"id": "1"}))));
        assert_eq!(filter.filter_expression(), None);
    }

    #[test]
    fn column_filter_matches_strings_and_numbers() {
        let filter = ChangeFilter::inserts("messages").eq("sender_id", "7");
        assert_eq!(filter.filter_expression().as_deref(), Some("sender_id=eq.7"));
        assert!(filter.matches(&insert("messages", json!({"sender_id": "7"}))));
        assert!(filter.matches(&insert("messages", json!({"sender_id": 7}))));
        assert!(!filter.matches(&insert("messages", json!({"sender_id": "8"}))));
        assert!(!filter.matches(&insert("messages", json!({}))));
    }

    #[tokio::test]
    async fn subscription_skips_non_matching_and_stops_on_unsubscribe() {
        let (tx, rx) = mpsc::channel(8);
        let mut subscription = Subscription::new(
            ChangeFilter::inserts("messages").eq("sender_id", "b"),
            rx,
            CancellationToken::new(),
        );

        tx.send(insert("messages", json!({"sender_id": "c"}))).await.unwrap();
        tx.send(insert("messages", json!({"sender_id": "b"}))).await.unwrap();

        let event = subscription.next().await.expect("matching event");
        assert_eq!(event.record["sender_id"], "b");

        subscription.unsubscribe();
        assert!(!subscription.is_active());
        assert!(subscription.next().await.is_none());
    }
}
