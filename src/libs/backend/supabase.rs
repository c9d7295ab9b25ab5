pub mod auth;
pub mod realtime;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use crate::libs::backend::backend_traits::{
    AuthApi, BackendError, ChangeFilter, MessageApi, PostApi, ProfileApi, RealtimeApi, StoryApi,
    Subscription,
};
use crate::libs::backend::records::{
    AuthEvent, AuthSession, LikeRecord, MessageRecord, NewMessage, NewPost, NewStory,
    PostRecord, ProfileRecord, ProfileUpdate, SignUpOutcome, SignUpRequest, StoryRecord,
};
use auth::GoTrueClient;
use realtime::RealtimeClient;
use rest::{expect_success, handle_response, RestQuery};

const POST_COLUMNS: &str = "*,profiles(full_name,avatar_url,username),post_likes(count)";
const STORY_COLUMNS: &str = "*,profiles(full_name,avatar_url,username)";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupabaseSettings {
    pub url: String,
    pub anon_key: String,
    pub http_timeout: Duration,
}

/// Client for a hosted Supabase project: GoTrue auth, PostgREST tables and the
/// realtime websocket.
pub struct SupabaseBackend {
    http: Client,
    rest_url: String,
    anon_key: String,
    auth: GoTrueClient,
    realtime: RealtimeClient,
}

impl SupabaseBackend {
    pub fn new(settings: &SupabaseSettings) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(settings.http_timeout).build()?;
        let base = settings.url.trim_end_matches('/');

        Ok(Self {
            auth: GoTrueClient::new(http.clone(), base, &settings.anon_key),
            realtime: RealtimeClient::new(base, &settings.anon_key),
            rest_url: format!("{}/rest/v1", base),
            anon_key: settings.anon_key.clone(),
            http,
        })
    }

    /// Resumes a session persisted by the host app.
    pub async fn with_refresh_token(self, refresh_token: &str) -> Result<Self, BackendError> {
        self.auth.restore(refresh_token).await?;
        Ok(self)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, BackendError> {
        let bearer = self.auth.bearer().await?;
        Ok(request.header("apikey", &self.anon_key).bearer_auth(bearer))
    }

    fn url(&self, query: &RestQuery) -> String {
        let query_string = query.query_string();
        if query_string.is_empty() {
            format!("{}/{}", self.rest_url, query.table())
        } else {
            format!("{}/{}?{}", self.rest_url, query.table(), query_string)
        }
    }

    async fn select<T: DeserializeOwned>(&self, query: RestQuery) -> Result<Vec<T>, BackendError> {
        debug!(table = query.table(), "select");
        let request = self.authorized(self.http.get(self.url(&query))).await?;
        handle_response(request.send().await?).await
    }

    /// Insert returning the stored row; `query` may carry a `select` for embeds.
    async fn insert<B, T>(&self, query: RestQuery, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(table = query.table(), "insert");
        let request = self
            .authorized(self.http.post(self.url(&query)))
            .await?
            .header("Prefer", "return=representation")
            .json(body);
        let mut rows: Vec<T> = handle_response(request.send().await?).await?;
        if rows.is_empty() {
            return Err(BackendError::NotFound(format!(
                "insert into {} returned no row",
                query.table()
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete(&self, query: RestQuery) -> Result<(), BackendError> {
        debug!(table = query.table(), "delete");
        let request = self.authorized(self.http.delete(self.url(&query))).await?;
        expect_success(request.send().await?).await
    }
}

#[async_trait]
impl AuthApi for SupabaseBackend {
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError> {
        self.auth.session().await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        self.auth.sign_in_with_password(email, password).await
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, BackendError> {
        self.auth.sign_up(request).await
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthSession, BackendError> {
        self.auth.verify_otp(email, code).await
    }

    async fn resend_otp(&self, email: &str) -> Result<(), BackendError> {
        self.auth.resend_otp(email).await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.auth.sign_out().await
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth.events()
    }
}

#[async_trait]
impl ProfileApi for SupabaseBackend {
    async fn load_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, BackendError> {
        let mut rows: Vec<ProfileRecord> = self
            .select(RestQuery::from("profiles").select("*").eq("id", user_id))
            .await?;
        Ok(rows.pop())
    }

    async fn list_profiles_except(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProfileRecord>, BackendError> {
        self.select(
            RestQuery::from("profiles")
                .select("*")
                .neq("id", user_id)
                .order(&["full_name.asc"]),
        )
        .await
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<ProfileRecord, BackendError> {
        let mut body = serde_json::to_value(update)?;
        body["id"] = serde_json::Value::String(user_id.to_string());

        let request = self
            .authorized(self.http.post(self.url(&RestQuery::from("profiles"))))
            .await?
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&body);
        let mut rows: Vec<ProfileRecord> = handle_response(request.send().await?).await?;
        rows.pop()
            .ok_or_else(|| BackendError::NotFound(format!("profile {}", user_id)))
    }
}

#[async_trait]
impl PostApi for SupabaseBackend {
    async fn list_posts(&self) -> Result<Vec<PostRecord>, BackendError> {
        self.select(
            RestQuery::from("posts")
                .select(POST_COLUMNS)
                .order(&["created_at.desc", "id.desc"]),
        )
        .await
    }

    async fn insert_post(&self, post: &NewPost) -> Result<PostRecord, BackendError> {
        self.insert(RestQuery::from("posts").select(POST_COLUMNS), post)
            .await
    }

    async fn like_post(&self, like: &LikeRecord) -> Result<(), BackendError> {
        let request = self
            .authorized(self.http.post(self.url(&RestQuery::from("post_likes"))))
            .await?
            .header("Prefer", "return=minimal,resolution=ignore-duplicates")
            .json(like);
        expect_success(request.send().await?).await
    }

    async fn unlike_post(&self, like: &LikeRecord) -> Result<(), BackendError> {
        self.delete(
            RestQuery::from("post_likes")
                .eq("post_id", &like.post_id)
                .eq("user_id", &like.user_id),
        )
        .await
    }

    async fn count_likes(&self, post_id: &str) -> Result<u32, BackendError> {
        let rows: Vec<LikeRecord> = self
            .select(
                RestQuery::from("post_likes")
                    .select("post_id,user_id")
                    .eq("post_id", post_id),
            )
            .await?;
        Ok(rows.len() as u32)
    }

    async fn liked_post_ids(&self, user_id: &str) -> Result<Vec<String>, BackendError> {
        let rows: Vec<LikeRecord> = self
            .select(
                RestQuery::from("post_likes")
                    .select("post_id,user_id")
                    .eq("user_id", user_id),
            )
            .await?;
        Ok(rows.into_iter().map(|like| like.post_id).collect())
    }
}

#[async_trait]
impl StoryApi for SupabaseBackend {
    async fn list_active_stories(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoryRecord>, BackendError> {
        self.select(
            RestQuery::from("stories")
                .select(STORY_COLUMNS)
                .gt("expires_at", now.to_rfc3339_opts(SecondsFormat::Micros, true))
                .order(&["created_at.desc"]),
        )
        .await
    }

    async fn insert_story(&self, story: &NewStory) -> Result<StoryRecord, BackendError> {
        self.insert(RestQuery::from("stories").select(STORY_COLUMNS), story)
            .await
    }
}

#[async_trait]
impl MessageApi for SupabaseBackend {
    async fn list_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<MessageRecord>, BackendError> {
        self.select(
            RestQuery::from("messages")
                .select("*")
                .or_all_eq(&[
                    &[("sender_id", user_a), ("receiver_id", user_b)],
                    &[("sender_id", user_b), ("receiver_id", user_a)],
                ])
                .order(&["created_at.asc", "id.asc"]),
        )
        .await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageRecord, BackendError> {
        self.insert(RestQuery::from("messages"), message).await
    }
}

#[async_trait]
impl RealtimeApi for SupabaseBackend {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, BackendError> {
        let token = self.auth.bearer().await?;
        self.realtime.subscribe(filter, token).await
    }
}
