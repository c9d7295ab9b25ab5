// Records handed to the Kotlin/Swift shells. Timestamps are unix milliseconds.

use crate::libs::assistant::{Citation, Turn, TurnRole};
use crate::libs::core::models::{Identity, Message, Post, PostBody, PostKind, Story};
use crate::libs::router::{Screen, View};
use crate::libs::toast::{Toast, ToastLevel};

#[derive(Clone, Debug, PartialEq, Eq, uniffi::Record)]
pub struct IdentityView {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
}

impl From<&Identity> for IdentityView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.name.clone(),
            avatar: identity.avatar.clone(),
            username: identity.username.clone(),
            bio: identity.bio.clone(),
            phone: identity.phone.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, uniffi::Enum)]
pub enum PostKindView {
    Text,
    Code,
    Image,
    Video,
}

impl From<PostKind> for PostKindView {
    fn from(kind: PostKind) -> Self {
        match kind {
            PostKind::Text => PostKindView::Text,
            PostKind::Code => PostKindView::Code,
            PostKind::Image => PostKindView::Image,
            PostKind::Video => PostKindView::Video,
        }
    }
}

impl From<PostKindView> for PostKind {
    fn from(kind: PostKindView) -> Self {
        match kind {
            PostKindView::Text => PostKind::Text,
            PostKindView::Code => PostKind::Code,
            PostKindView::Image => PostKind::Image,
            PostKindView::Video => PostKind::Video,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, uniffi::Record)]
pub struct PostView {
    pub id: String,
    pub author: IdentityView,
    pub created_at_ms: i64,
    pub content: String,
    pub kind: PostKindView,
    pub media_url: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub likes: u32,
    pub comments: u32,
    pub shares: u32,
    pub liked_by_me: bool,
}

impl From<&Post> for PostView {
    fn from(post: &Post) -> Self {
        let language = match &post.body {
            PostBody::Code { language } => language.clone(),
            _ => None,
        };
        Self {
            id: post.id.clone(),
            author: IdentityView::from(&post.author),
            created_at_ms: post.created_at.timestamp_millis(),
            content: post.content.clone(),
            kind: post.kind().into(),
            media_url: post.media_url().map(str::to_string),
            title: post.title.clone(),
            language,
            likes: post.likes,
            comments: post.comments,
            shares: post.shares,
            liked_by_me: post.liked_by_me,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, uniffi::Record)]
pub struct StoryView {
    pub id: String,
    pub author: IdentityView,
    pub media_url: String,
    pub expires_at_ms: i64,
}

impl From<&Story> for StoryView {
    fn from(story: &Story) -> Self {
        Self {
            id: story.id.clone(),
            author: IdentityView::from(&story.author),
            media_url: story.media_url.clone(),
            expires_at_ms: story.expires_at.timestamp_millis(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, uniffi::Record)]
pub struct MessageView {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at_ms: i64,
    pub is_from_user: bool,
}

impl MessageView {
    /// `me` decides which side of the bubble list the message goes on.
    pub fn new(message: &Message, me: &str) -> Self {
        Self {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            created_at_ms: message.created_at.timestamp_millis(),
            is_from_user: message.is_from_user(me),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, uniffi::Record)]
pub struct CitationView {
    pub title: String,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq, uniffi::Record)]
pub struct TurnView {
    pub id: String,
    pub from_user: bool,
    pub text: String,
    pub citations: Vec<CitationView>,
    pub image_mime_type: Option<String>,
    pub image_bytes: Option<Vec<u8>>,
}

impl From<&Turn> for TurnView {
    fn from(turn: &Turn) -> Self {
        Self {
            id: turn.id.clone(),
            from_user: turn.role == TurnRole::User,
            text: turn.text.clone(),
            citations: turn
                .citations
                .iter()
                .map(|Citation { title, uri }| CitationView {
                    title: title.clone(),
                    uri: uri.clone(),
                })
                .collect(),
            image_mime_type: turn.image.as_ref().map(|image| image.mime_type.clone()),
            image_bytes: turn.image.as_ref().map(|image| image.bytes.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, uniffi::Enum)]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, uniffi::Record)]
pub struct ToastView {
    pub id: u64,
    pub kind: ToastKind,
    pub message: String,
}

impl From<&Toast> for ToastView {
    fn from(toast: &Toast) -> Self {
        Self {
            id: toast.id,
            kind: match toast.level {
                ToastLevel::Info => ToastKind::Info,
                ToastLevel::Success => ToastKind::Success,
                ToastLevel::Error => ToastKind::Error,
            },
            message: toast.message.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, uniffi::Enum)]
pub enum ViewTab {
    Feed,
    Chat,
    Assistant,
    CodeSandbox,
    Profile,
}

impl From<View> for ViewTab {
    fn from(view: View) -> Self {
        match view {
            View::Feed => ViewTab::Feed,
            View::Chat => ViewTab::Chat,
            View::Assistant => ViewTab::Assistant,
            View::CodeSandbox => ViewTab::CodeSandbox,
            View::Profile => ViewTab::Profile,
        }
    }
}

impl From<ViewTab> for View {
    fn from(tab: ViewTab) -> Self {
        match tab {
            ViewTab::Feed => View::Feed,
            ViewTab::Chat => View::Chat,
            ViewTab::Assistant => View::Assistant,
            ViewTab::CodeSandbox => View::CodeSandbox,
            ViewTab::Profile => View::Profile,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, uniffi::Enum)]
pub enum ScreenKind {
    ConfigurationError { missing: Vec<String> },
    Loading,
    Login,
    VerifyCode { email: String },
    Main { tab: ViewTab },
}

impl From<&Screen> for ScreenKind {
    fn from(screen: &Screen) -> Self {
        match screen {
            Screen::ConfigurationError { missing } => ScreenKind::ConfigurationError {
                missing: missing.clone(),
            },
            Screen::Loading => ScreenKind::Loading,
            Screen::Login => ScreenKind::Login,
            Screen::VerifyCode { email } => ScreenKind::VerifyCode {
                email: email.clone(),
            },
            Screen::Main(view) => ScreenKind::Main { tab: (*view).into() },
        }
    }
}
