#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

use vibogram_core::libs::assistant::{AiService, Completion, CompletionRequest, GeneratedImage};
use vibogram_core::libs::backend::backend_traits::{
    AuthApi, BackendError, ChangeFilter, MessageApi, PostApi, ProfileApi, RealtimeApi, StoryApi,
    Subscription,
};
use vibogram_core::libs::backend::records::{
    AuthEvent, AuthSession, LikeRecord, MessageRecord, NewMessage, NewPost, NewStory, PostRecord,
    ProfileRecord, ProfileUpdate, SignUpOutcome, SignUpRequest, StoryRecord,
};
use vibogram_core::libs::backend::sqlite::{SqliteBackend, SqliteBackendOptions};
use vibogram_core::libs::core::config::AppConfig;
use vibogram_core::libs::core::error::AiError;
use vibogram_core::libs::core::models::Identity;
use vibogram_core::libs::session::{SessionStore, SignUpForm};
use vibogram_core::libs::toast::NotificationCenter;

pub const PASSWORD: &str = "hunter22";

/// A fresh database in its own temporary directory. Keep the `TempDir` alive for
/// the duration of the test.
pub fn open_backend(options: SqliteBackendOptions) -> (TempDir, SqliteBackend) {
    let dir = TempDir::new().expect("Failed to create test directory");
    let backend = SqliteBackend::open(dir.path().join("vibogram.db"), options)
        .expect("Failed to open test database");
    (dir, backend)
}

pub fn sign_up_form(email: &str, full_name: &str) -> SignUpForm {
    SignUpForm {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        confirm_password: PASSWORD.to_string(),
        full_name: full_name.to_string(),
    }
}

pub fn sign_up_request(email: &str, full_name: &str) -> SignUpRequest {
    SignUpRequest {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        full_name: full_name.to_string(),
    }
}

/// Signs a user up on `client` (which is then signed in as that user).
pub async fn register(client: &SqliteBackend, email: &str, full_name: &str) -> AuthSession {
    match client
        .sign_up(&sign_up_request(email, full_name))
        .await
        .expect("sign up")
    {
        SignUpOutcome::SignedIn(session) => session,
        other => panic!("expected an immediate session, got {:?}", other),
    }
}

/// A session store that is already signed in on `backend`.
pub async fn signed_in_store(backend: Arc<TestBackend>, email: &str, full_name: &str) -> (Arc<SessionStore>, Identity) {
    let store = Arc::new(SessionStore::new(backend, Duration::from_secs(2)));
    let state = store
        .sign_up(&sign_up_form(email, full_name))
        .await
        .expect("sign up");
    let identity = state.identity().cloned().expect("signed in after sign up");
    (store, identity)
}

pub fn ready_config() -> AppConfig {
    AppConfig {
        supabase_url: Some("https://project.supabase.co".to_string()),
        supabase_anon_key: Some("anon-key".to_string()),
        init_timeout_ms: 2_000,
        ..AppConfig::default()
    }
}

pub fn toasts() -> NotificationCenter {
    NotificationCenter::default()
}

pub fn toast_messages(toasts: &NotificationCenter) -> Vec<String> {
    toasts.active().into_iter().map(|toast| toast.message).collect()
}

/// Waits until `check` holds, polling every few milliseconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn injected(what: &str) -> BackendError {
    BackendError::Api {
        status: 500,
        message: format!("injected {} failure", what),
    }
}

/// The local backend with failure and latency knobs.
pub struct TestBackend {
    pub inner: SqliteBackend,
    pub session_delay: Mutex<Option<Duration>>,
    pub fail_session: AtomicBool,
    pub fail_profiles: AtomicBool,
    pub fail_list_posts: AtomicBool,
    pub fail_post_inserts: AtomicBool,
    pub fail_message_inserts: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_sign_out: AtomicBool,
    /// Delays applied to successive `list_posts` calls after the rows are read.
    pub list_posts_delays: Mutex<VecDeque<Duration>>,
    pub list_posts_calls: AtomicUsize,
}

impl TestBackend {
    pub fn new(inner: SqliteBackend) -> Self {
        Self {
            inner,
            session_delay: Mutex::new(None),
            fail_session: AtomicBool::new(false),
            fail_profiles: AtomicBool::new(false),
            fail_list_posts: AtomicBool::new(false),
            fail_post_inserts: AtomicBool::new(false),
            fail_message_inserts: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            list_posts_delays: Mutex::new(VecDeque::new()),
            list_posts_calls: AtomicUsize::new(0),
        }
    }

    pub fn list_posts_calls(&self) -> usize {
        self.list_posts_calls.load(Ordering::SeqCst)
    }

    pub fn delay_session(&self, delay: Duration) {
        *self.session_delay.lock().expect("lock") = Some(delay);
    }

    pub fn delay_next_list_posts(&self, delay: Duration) {
        self.list_posts_delays.lock().expect("lock").push_back(delay);
    }
}

#[async_trait]
impl AuthApi for TestBackend {
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError> {
        let delay = *self.session_delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_session.load(Ordering::SeqCst) {
            return Err(injected("session"));
        }
        self.inner.current_session().await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession, BackendError> {
        self.inner.sign_in_with_password(email, password).await
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, BackendError> {
        self.inner.sign_up(request).await
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthSession, BackendError> {
        self.inner.verify_otp(email, code).await
    }

    async fn resend_otp(&self, email: &str) -> Result<(), BackendError> {
        self.inner.resend_otp(email).await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(injected("sign out"));
        }
        self.inner.sign_out().await
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.auth_events()
    }
}

#[async_trait]
impl ProfileApi for TestBackend {
    async fn load_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, BackendError> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(injected("profile"));
        }
        self.inner.load_profile(user_id).await
    }

    async fn list_profiles_except(&self, user_id: &str) -> Result<Vec<ProfileRecord>, BackendError> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(injected("profile"));
        }
        self.inner.list_profiles_except(user_id).await
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<ProfileRecord, BackendError> {
        self.inner.update_profile(user_id, update).await
    }
}

#[async_trait]
impl PostApi for TestBackend {
    async fn list_posts(&self) -> Result<Vec<PostRecord>, BackendError> {
        self.list_posts_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list_posts.load(Ordering::SeqCst) {
            return Err(injected("list posts"));
        }
        let delay = self.list_posts_delays.lock().expect("lock").pop_front();
        let posts = self.inner.list_posts().await?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(posts)
    }

    async fn insert_post(&self, post: &NewPost) -> Result<PostRecord, BackendError> {
        if self.fail_post_inserts.load(Ordering::SeqCst) {
            return Err(injected("post insert"));
        }
        self.inner.insert_post(post).await
    }

    async fn like_post(&self, like: &LikeRecord) -> Result<(), BackendError> {
        self.inner.like_post(like).await
    }

    async fn unlike_post(&self, like: &LikeRecord) -> Result<(), BackendError> {
        self.inner.unlike_post(like).await
    }

    async fn count_likes(&self, post_id: &str) -> Result<u32, BackendError> {
        self.inner.count_likes(post_id).await
    }

    async fn liked_post_ids(&self, user_id: &str) -> Result<Vec<String>, BackendError> {
        self.inner.liked_post_ids(user_id).await
    }
}

#[async_trait]
impl StoryApi for TestBackend {
    async fn list_active_stories(&self, now: DateTime<Utc>) -> Result<Vec<StoryRecord>, BackendError> {
        self.inner.list_active_stories(now).await
    }

    async fn insert_story(&self, story: &NewStory) -> Result<StoryRecord, BackendError> {
        self.inner.insert_story(story).await
    }
}

#[async_trait]
impl MessageApi for TestBackend {
    async fn list_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRecord>, BackendError> {
        self.inner.list_conversation(user_a, user_b).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageRecord, BackendError> {
        if self.fail_message_inserts.load(Ordering::SeqCst) {
            return Err(injected("message insert"));
        }
        self.inner.insert_message(message).await
    }
}

#[async_trait]
impl RealtimeApi for TestBackend {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, BackendError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BackendError::Realtime("injected subscribe failure".to_string()));
        }
        self.inner.subscribe(filter).await
    }
}

pub fn test_backend() -> (TempDir, Arc<TestBackend>) {
    test_backend_with(SqliteBackendOptions::default())
}

pub fn test_backend_with(options: SqliteBackendOptions) -> (TempDir, Arc<TestBackend>) {
    let (dir, backend) = open_backend(options);
    (dir, Arc::new(TestBackend::new(backend)))
}

/// A second signed-out client on the same database.
pub fn second_client(backend: &TestBackend) -> Arc<TestBackend> {
    Arc::new(TestBackend::new(backend.inner.new_client()))
}

/// Scripted AI service. Replies are consumed in order; an empty script fails.
#[derive(Default)]
pub struct FakeAi {
    pub completions: Mutex<VecDeque<Result<Completion, AiError>>>,
    pub images: Mutex<VecDeque<Result<Option<GeneratedImage>, AiError>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub image_prompts: Mutex<Vec<String>>,
    pub delay: Mutex<Option<Duration>>,
}

impl FakeAi {
    pub fn reply(self, completion: Result<Completion, AiError>) -> Self {
        self.completions.lock().expect("lock").push_back(completion);
        self
    }

    pub fn image(self, image: Result<Option<GeneratedImage>, AiError>) -> Self {
        self.images.lock().expect("lock").push_back(image);
        self
    }

    pub fn slow(self, delay: Duration) -> Self {
        *self.delay.lock().expect("lock") = Some(delay);
        self
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AiService for FakeAi {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AiError> {
        self.requests.lock().expect("lock").push(request.clone());
        self.pause().await;
        self.completions
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Err(AiError::NotConfigured))
    }

    async fn generate_image(&self, prompt: &str) -> Result<Option<GeneratedImage>, AiError> {
        self.image_prompts.lock().expect("lock").push(prompt.to_string());
        self.pause().await;
        self.images
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Err(AiError::NotConfigured))
    }
}
