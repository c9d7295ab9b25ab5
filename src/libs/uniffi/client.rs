use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::libs::app::{App, AppContext};
use crate::libs::assistant::AssistantError;
use crate::libs::backend::records::ProfileUpdate;
use crate::libs::conversation::ConversationError;
use crate::libs::core::config::{AppConfig, ConfigStatus};
use crate::libs::core::error::{AppError, AuthError, ConfigError};
use crate::libs::core::logging::init_logging;
use crate::libs::feed::{FeedError, PostDraft};
use crate::libs::router::Screen;
use crate::libs::session::SignUpForm;
use crate::libs::uniffi::models::{
    IdentityView, MessageView, PostKindView, PostView, ScreenKind, StoryView, ToastView,
    TurnView, ViewTab,
};

/// Errors surfaced to the Kotlin/Swift shells.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClientError {
    #[error("Missing required configuration: {}", .keys.join(", "))]
    NotConfigured { keys: Vec<String> },
    #[error("Invalid configuration: {message}")]
    Config { message: String },
    #[error("{message}")]
    Auth { message: String },
    #[error("Sign in to continue")]
    NotSignedIn,
    #[error("{message}")]
    Assistant { message: String },
    #[error("{message}")]
    Failed { message: String },
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing { keys } => ClientError::NotConfigured { keys },
            other => ClientError::Config {
                message: other.to_string(),
            },
        }
    }
}

impl From<AuthError> for ClientError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotSignedIn => ClientError::NotSignedIn,
            other => ClientError::Auth {
                message: other.to_string(),
            },
        }
    }
}

impl From<FeedError> for ClientError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::NotSignedIn | FeedError::Cancelled => ClientError::NotSignedIn,
            other => ClientError::Failed {
                message: other.to_string(),
            },
        }
    }
}

impl From<ConversationError> for ClientError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::NotSignedIn => ClientError::NotSignedIn,
            other => ClientError::Failed {
                message: other.to_string(),
            },
        }
    }
}

impl From<AssistantError> for ClientError {
    fn from(err: AssistantError) -> Self {
        ClientError::Assistant {
            message: err.to_string(),
        }
    }
}

impl From<AppError> for ClientError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Config(e) => e.into(),
            AppError::Auth(e) => e.into(),
            AppError::Feed(e) => e.into(),
            AppError::Conversation(e) => e.into(),
            AppError::Assistant(e) => e.into(),
            AppError::NotMounted => ClientError::NotSignedIn,
            AppError::Backend(e) => ClientError::Failed {
                message: e.to_string(),
            },
        }
    }
}

enum ClientState {
    /// Backend keys are absent; only the configuration screen can be shown.
    Unconfigured(Vec<String>),
    Ready(Arc<App>),
}

/// Entry point for the native shells. Every screen and store operation goes
/// through here and comes back as the records in [`crate::libs::uniffi::models`].
#[derive(uniffi::Object)]
pub struct VibogramClient {
    state: ClientState,
}

impl VibogramClient {
    /// Wraps an already built app, e.g. one running on the local backend.
    pub fn with_app(app: Arc<App>) -> Arc<Self> {
        Arc::new(Self {
            state: ClientState::Ready(app),
        })
    }

    fn app(&self) -> Result<&Arc<App>, ClientError> {
        match &self.state {
            ClientState::Ready(app) => Ok(app),
            ClientState::Unconfigured(keys) => Err(ClientError::NotConfigured { keys: keys.clone() }),
        }
    }

    fn me(&self) -> Result<String, ClientError> {
        self.app()?
            .session()
            .identity()
            .map(|identity| identity.id)
            .ok_or(ClientError::NotSignedIn)
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl VibogramClient {
    /// Loads configuration from `config_path` (optional TOML) and `VIBOGRAM_*`
    /// variables and connects to the hosted backend.
    #[uniffi::constructor]
    pub fn new(config_path: Option<String>) -> Result<Arc<Self>, ClientError> {
        let config = AppConfig::load(config_path.as_deref().map(Path::new))?;
        init_logging(&config.logging);

        let state = match config.status() {
            ConfigStatus::Missing(keys) => ClientState::Unconfigured(keys),
            ConfigStatus::Ready => ClientState::Ready(App::new(AppContext::from_config(config)?)),
        };
        info!(configured = matches!(state, ClientState::Ready(_)), "client created");
        Ok(Arc::new(Self { state }))
    }

    /// Resolves the stored session and returns the first screen to show.
    pub async fn start(&self) -> ScreenKind {
        match &self.state {
            ClientState::Ready(app) => ScreenKind::from(&app.start().await),
            ClientState::Unconfigured(keys) => ScreenKind::ConfigurationError {
                missing: keys.clone(),
            },
        }
    }

    pub fn screen(&self) -> ScreenKind {
        match &self.state {
            ClientState::Ready(app) => ScreenKind::from(&app.screen()),
            ClientState::Unconfigured(keys) => ScreenKind::from(&Screen::ConfigurationError {
                missing: keys.clone(),
            }),
        }
    }

    pub fn select_tab(&self, tab: ViewTab) -> Result<(), ClientError> {
        self.app()?.select_view(tab.into());
        Ok(())
    }

    pub fn toggle_sidebar(&self) -> Result<bool, ClientError> {
        let app = self.app()?;
        app.toggle_sidebar();
        Ok(app.sidebar_open())
    }

    pub fn current_user(&self) -> Option<IdentityView> {
        let app = self.app().ok()?;
        app.session().identity().as_ref().map(IdentityView::from)
    }

    pub async fn sign_in(&self, email: String, password: String) -> Result<IdentityView, ClientError> {
        let identity = self.app()?.sign_in(&email, &password).await?;
        Ok(IdentityView::from(&identity))
    }

    /// Returns the screen to move to: the feed, or code entry when the
    /// address still has to be confirmed.
    pub async fn sign_up(
        &self,
        email: String,
        password: String,
        confirm_password: String,
        full_name: String,
    ) -> Result<ScreenKind, ClientError> {
        let app = self.app()?;
        let form = SignUpForm {
            email,
            password,
            confirm_password,
            full_name,
        };
        app.sign_up(&form).await?;
        Ok(ScreenKind::from(&app.screen()))
    }

    pub async fn verify_code(&self, email: String, code: String) -> Result<IdentityView, ClientError> {
        let identity = self.app()?.verify_code(&email, &code).await?;
        Ok(IdentityView::from(&identity))
    }

    pub async fn resend_code(&self, email: String) -> Result<(), ClientError> {
        Ok(self.app()?.resend_code(&email).await?)
    }

    pub fn cancel_verification(&self) -> Result<(), ClientError> {
        self.app()?.cancel_verification();
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<(), ClientError> {
        self.app()?.sign_out().await;
        Ok(())
    }

    pub async fn update_profile(
        &self,
        full_name: Option<String>,
        username: Option<String>,
        bio: Option<String>,
        avatar_url: Option<String>,
        phone: Option<String>,
    ) -> Result<IdentityView, ClientError> {
        let update = ProfileUpdate {
            full_name,
            avatar_url,
            username,
            bio,
            phone,
        };
        let identity = self.app()?.session().update_profile(&update).await?;
        Ok(IdentityView::from(&identity))
    }

    /// Posts currently on screen, newest first.
    pub async fn posts(&self) -> Result<Vec<PostView>, ClientError> {
        let feed = self.app()?.feed().await?;
        Ok(feed.posts().await.iter().map(PostView::from).collect())
    }

    pub async fn refresh_feed(&self) -> Result<Vec<PostView>, ClientError> {
        let feed = self.app()?.feed().await?;
        let posts = feed.fetch_posts().await?;
        Ok(posts.iter().map(PostView::from).collect())
    }

    /// `None` when the content is blank and nothing was sent.
    pub async fn publish_post(
        &self,
        content: String,
        kind: PostKindView,
        media_url: Option<String>,
        title: Option<String>,
        language: Option<String>,
    ) -> Result<Option<PostView>, ClientError> {
        let feed = self.app()?.feed().await?;
        let draft = PostDraft {
            content,
            kind: kind.into(),
            media_url,
            title,
            language,
        };
        let post = feed.publish(draft).await?;
        Ok(post.as_ref().map(PostView::from))
    }

    pub async fn toggle_like(&self, post_id: String) -> Result<u32, ClientError> {
        let feed = self.app()?.feed().await?;
        Ok(feed.toggle_like(&post_id).await?)
    }

    pub async fn stories(&self) -> Result<Vec<StoryView>, ClientError> {
        let feed = self.app()?.feed().await?;
        Ok(feed.stories().await.iter().map(StoryView::from).collect())
    }

    pub async fn add_story(&self, media_url: String) -> Result<StoryView, ClientError> {
        let feed = self.app()?.feed().await?;
        let story = feed.add_story(&media_url).await?;
        Ok(StoryView::from(&story))
    }

    pub async fn peers(&self) -> Result<Vec<IdentityView>, ClientError> {
        let conversations = self.app()?.conversations().await?;
        let peers = conversations.list_peers().await?;
        Ok(peers.iter().map(IdentityView::from).collect())
    }

    pub async fn open_conversation(&self, peer_id: String) -> Result<Vec<MessageView>, ClientError> {
        let me = self.me()?;
        let conversations = self.app()?.conversations().await?;
        let history = conversations.open_conversation(&peer_id).await?;
        Ok(history.iter().map(|m| MessageView::new(m, &me)).collect())
    }

    pub async fn messages(&self) -> Result<Vec<MessageView>, ClientError> {
        let me = self.me()?;
        let conversations = self.app()?.conversations().await?;
        Ok(conversations
            .messages()
            .await
            .iter()
            .map(|m| MessageView::new(m, &me))
            .collect())
    }

    pub async fn send_message(&self, content: String) -> Result<Option<MessageView>, ClientError> {
        let me = self.me()?;
        let conversations = self.app()?.conversations().await?;
        let sent = conversations.send(&content).await?;
        Ok(sent.as_ref().map(|m| MessageView::new(m, &me)))
    }

    pub async fn close_conversation(&self) -> Result<(), ClientError> {
        self.app()?.conversations().await?.close_conversation().await;
        Ok(())
    }

    pub async fn ask_assistant(&self, prompt: String) -> Result<TurnView, ClientError> {
        let turn = self.app()?.assistant().ask(&prompt).await?;
        Ok(TurnView::from(&turn))
    }

    /// The assistant turn holding the generated image, if any came back.
    pub async fn imagine(&self, prompt: String) -> Result<TurnView, ClientError> {
        let assistant = self.app()?.assistant();
        assistant.imagine(&prompt).await?;
        assistant
            .transcript()
            .await
            .last()
            .map(TurnView::from)
            .ok_or_else(|| ClientError::Failed {
                message: "image turn was not recorded".to_string(),
            })
    }

    pub async fn transcript(&self) -> Result<Vec<TurnView>, ClientError> {
        let turns = self.app()?.assistant().transcript().await;
        Ok(turns.iter().map(TurnView::from).collect())
    }

    pub fn edit_code(&self, code: String) -> Result<(), ClientError> {
        self.app()?.edit_code(&code);
        Ok(())
    }

    pub fn save_code(&self) -> Result<(), ClientError> {
        self.app()?.save_code();
        Ok(())
    }

    pub async fn share_code(&self, title: Option<String>) -> Result<Option<PostView>, ClientError> {
        let post = self.app()?.share_sandbox(title).await?;
        Ok(post.as_ref().map(PostView::from))
    }

    pub fn toasts(&self) -> Vec<ToastView> {
        match self.app() {
            Ok(app) => app.toasts().active().iter().map(ToastView::from).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn dismiss_toast(&self, id: u64) {
        if let Ok(app) = self.app() {
            app.toasts().dismiss(id);
        }
    }

    pub async fn shutdown(&self) {
        if let Ok(app) = self.app() {
            app.shutdown().await;
        }
    }
}
