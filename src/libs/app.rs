use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::libs::assistant::gemini::GeminiClient;
use crate::libs::assistant::{AiService, AssistantBridge, UnconfiguredAi};
use crate::libs::backend::backend_traits::Backend;
use crate::libs::backend::supabase::SupabaseBackend;
use crate::libs::conversation::ConversationStore;
use crate::libs::core::config::{AppConfig, ConfigStatus};
use crate::libs::core::error::{AppError, AuthError, ConfigError};
use crate::libs::core::models::{Identity, Post};
use crate::libs::feed::FeedRepository;
use crate::libs::realtime::RealtimeBridge;
use crate::libs::router::{Screen, View, ViewRouter};
use crate::libs::sandbox::CodeSandbox;
use crate::libs::session::{SessionState, SessionStore, SignUpForm};
use crate::libs::toast::NotificationCenter;

/// Everything the stores share, built once and passed down.
#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub backend: Arc<dyn Backend>,
    pub ai: Arc<dyn AiService>,
    pub toasts: NotificationCenter,
}

impl AppContext {
    pub fn new(config: AppConfig, backend: Arc<dyn Backend>, ai: Arc<dyn AiService>) -> Self {
        let toasts = NotificationCenter::new(config.toast_lifetime());
        Self {
            config,
            backend,
            ai,
            toasts,
        }
    }

    /// Hosted backend and AI client from configuration. Fails with
    /// [`ConfigError::Missing`] when the backend keys are absent.
    pub fn from_config(config: AppConfig) -> Result<Self, ConfigError> {
        let settings = config.supabase_settings()?;
        let backend = SupabaseBackend::new(&settings)
            .map_err(|e| ConfigError::Invalid(format!("backend client: {}", e)))?;

        let ai: Arc<dyn AiService> = match config.gemini_settings() {
            Some(settings) => Arc::new(
                GeminiClient::new(settings)
                    .map_err(|e| ConfigError::Invalid(format!("AI client: {}", e)))?,
            ),
            None => {
                warn!("no AI key configured, assistant will answer with its fallback");
                Arc::new(UnconfiguredAi)
            }
        };
        Ok(Self::new(config, Arc::new(backend), ai))
    }
}

/// Stores that exist only while someone is signed in.
struct Mounted {
    user_id: String,
    token: CancellationToken,
    feed: Arc<FeedRepository>,
    conversations: Arc<ConversationStore>,
    realtime: Arc<Mutex<Option<RealtimeBridge>>>,
    /// Flips to true once the first fetches have finished.
    ready: watch::Receiver<bool>,
}

impl Mounted {
    async fn unmount(self) {
        self.token.cancel();
        let realtime = lock(&self.realtime).take();
        if let Some(realtime) = realtime {
            realtime.stop();
        }
        self.conversations.close_conversation().await;
        debug!(user_id = %self.user_id, "authenticated view unmounted");
    }
}

/// Network work of a fresh mount. Runs after the slot lock is released.
struct MountLoad {
    user_id: String,
    token: CancellationToken,
    backend: Arc<dyn Backend>,
    feed: Arc<FeedRepository>,
    realtime: Arc<Mutex<Option<RealtimeBridge>>>,
    toasts: NotificationCenter,
    ready: watch::Sender<bool>,
}

impl MountLoad {
    async fn run(self) {
        match RealtimeBridge::start(Arc::clone(&self.backend), Arc::clone(&self.feed), &self.token).await {
            Ok(bridge) if !self.token.is_cancelled() => *lock(&self.realtime) = Some(bridge),
            Ok(_) => debug!("view closed while subscribing"),
            Err(e) => {
                warn!(error = %e, "live feed updates unavailable");
                if !self.token.is_cancelled() {
                    self.toasts.error("Live updates unavailable");
                }
            }
        }

        // Failures are logged and toasted by the repository.
        let _ = self.feed.fetch_posts().await;
        let _ = self.feed.fetch_stories(Utc::now()).await;
        info!(user_id = %self.user_id, "authenticated view mounted");
        let _ = self.ready.send(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The client core: session gate, router and the per-session stores.
pub struct App {
    context: AppContext,
    config_status: ConfigStatus,
    session: Arc<SessionStore>,
    assistant: Arc<AssistantBridge>,
    router: Mutex<ViewRouter>,
    sandbox: Mutex<CodeSandbox>,
    mounted: tokio::sync::Mutex<Option<Mounted>>,
    lifetime: CancellationToken,
}

impl App {
    pub fn new(context: AppContext) -> Arc<Self> {
        let session = Arc::new(SessionStore::new(
            Arc::clone(&context.backend),
            context.config.init_timeout(),
        ));
        Arc::new(Self {
            config_status: context.config.status(),
            assistant: Arc::new(AssistantBridge::new(Arc::clone(&context.ai))),
            session,
            context,
            router: Mutex::new(ViewRouter::new()),
            sandbox: Mutex::new(CodeSandbox::new()),
            mounted: tokio::sync::Mutex::new(None),
            lifetime: CancellationToken::new(),
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn assistant(&self) -> &Arc<AssistantBridge> {
        &self.assistant
    }

    pub fn toasts(&self) -> &NotificationCenter {
        &self.context.toasts
    }

    /// Resolves the session (bounded by the init timeout), mounts the signed-in
    /// view if there is one and starts following session changes.
    pub async fn start(self: &Arc<Self>) -> Screen {
        if let ConfigStatus::Missing(keys) = &self.config_status {
            warn!(missing = ?keys, "configuration incomplete");
            return self.screen();
        }

        let _ = self.session.watch_auth_changes(self.lifetime.child_token());
        let state = self.session.initialize().await;
        info!(signed_in = state.identity().is_some(), "session ready");
        self.reconcile_mount().await;
        self.follow_session();
        self.screen()
    }

    fn follow_session(self: &Arc<Self>) {
        let app: Weak<Self> = Arc::downgrade(self);
        let mut changes = self.session.subscribe();
        let lifetime = self.lifetime.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = lifetime.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let Some(app) = app.upgrade() else {
                    break;
                };
                app.reconcile_mount().await;
            }
        });
    }

    /// Mounts the authenticated view for the current identity, or unmounts it
    /// when nobody is signed in. The slot lock is only held while the stores are
    /// swapped; subscribing and the first fetches run after it is released.
    pub async fn reconcile_mount(&self) {
        let identity = self.session.identity();
        let mut slot = self.mounted.lock().await;

        let current_user = slot.as_ref().map(|m| m.user_id.clone());
        if identity.as_ref().map(|i| &i.id) == current_user.as_ref() {
            let ready = slot.as_ref().map(|m| m.ready.clone());
            drop(slot);
            if let Some(mut ready) = ready {
                // Another caller may still be loading this view.
                let _ = ready.wait_for(|done| *done).await;
            }
            return;
        }
        if let Some(previous) = slot.take() {
            previous.unmount().await;
        }
        let Some(identity) = identity else {
            return;
        };

        let (mounted, load) = self.mount(&identity);
        *slot = Some(mounted);
        drop(slot);
        load.run().await;
    }

    fn mount(&self, identity: &Identity) -> (Mounted, MountLoad) {
        let token = self.session.scope();
        let backend = &self.context.backend;
        let feed = Arc::new(FeedRepository::new(
            Arc::clone(backend),
            Arc::clone(&self.session),
            self.context.toasts.clone(),
            token.child_token(),
            self.context.config.story_lifetime(),
        ));
        let conversations = Arc::new(ConversationStore::new(
            Arc::clone(backend),
            Arc::clone(&self.session),
            self.context.toasts.clone(),
            token.child_token(),
        ));
        let realtime = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = watch::channel(false);

        let load = MountLoad {
            user_id: identity.id.clone(),
            token: token.clone(),
            backend: Arc::clone(backend),
            feed: Arc::clone(&feed),
            realtime: Arc::clone(&realtime),
            toasts: self.context.toasts.clone(),
            ready: ready_tx,
        };
        let mounted = Mounted {
            user_id: identity.id.clone(),
            token,
            feed,
            conversations,
            realtime,
            ready: ready_rx,
        };
        (mounted, load)
    }

    pub async fn feed(&self) -> Result<Arc<FeedRepository>, AppError> {
        self.mounted
            .lock()
            .await
            .as_ref()
            .map(|m| Arc::clone(&m.feed))
            .ok_or(AppError::NotMounted)
    }

    pub async fn conversations(&self) -> Result<Arc<ConversationStore>, AppError> {
        self.mounted
            .lock()
            .await
            .as_ref()
            .map(|m| Arc::clone(&m.conversations))
            .ok_or(AppError::NotMounted)
    }

    pub async fn is_live(&self) -> bool {
        self.mounted
            .lock()
            .await
            .as_ref()
            .and_then(|m| lock(&m.realtime).as_ref().map(RealtimeBridge::is_running))
            .unwrap_or(false)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = self.session.sign_in(email, password).await?;
        self.reconcile_mount().await;
        Ok(identity)
    }

    pub async fn sign_up(&self, form: &SignUpForm) -> Result<SessionState, AuthError> {
        let state = self.session.sign_up(form).await?;
        self.reconcile_mount().await;
        Ok(state)
    }

    pub async fn verify_code(&self, email: &str, code: &str) -> Result<Identity, AuthError> {
        let identity = self.session.verify_code(email, code).await?;
        self.reconcile_mount().await;
        Ok(identity)
    }

    pub async fn resend_code(&self, email: &str) -> Result<(), AuthError> {
        self.session.resend_code(email).await?;
        self.context.toasts.info("A new code is on its way");
        Ok(())
    }

    pub fn cancel_verification(&self) {
        self.session.cancel_verification();
    }

    pub async fn sign_out(&self) {
        if let Some(mounted) = self.mounted.lock().await.take() {
            mounted.unmount().await;
        }
        self.session.sign_out().await;
        self.lock_router().select(View::Feed);
    }

    pub fn screen(&self) -> Screen {
        self.lock_router()
            .screen(&self.config_status, &self.session.current())
    }

    pub fn select_view(&self, view: View) {
        self.lock_router().select(view);
    }

    pub fn toggle_sidebar(&self) {
        self.lock_router().toggle_sidebar();
    }

    pub fn sidebar_open(&self) -> bool {
        self.lock_router().sidebar_open()
    }

    pub fn edit_code(&self, code: &str) {
        self.lock_sandbox().edit(code);
    }

    pub fn save_code(&self) {
        self.lock_sandbox().save();
    }

    pub fn sandbox(&self) -> CodeSandbox {
        self.lock_sandbox().clone()
    }

    /// Publishes the sandbox buffer as a code post.
    pub async fn share_sandbox(&self, title: Option<String>) -> Result<Option<Post>, AppError> {
        let draft = self.lock_sandbox().share_draft(title);
        let feed = self.feed().await?;
        Ok(feed.publish(draft).await?)
    }

    pub async fn shutdown(&self) {
        self.lifetime.cancel();
        if let Some(mounted) = self.mounted.lock().await.take() {
            mounted.unmount().await;
        }
    }

    fn lock_router(&self) -> MutexGuard<'_, ViewRouter> {
        lock(&self.router)
    }

    fn lock_sandbox(&self) -> MutexGuard<'_, CodeSandbox> {
        lock(&self.sandbox)
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}
