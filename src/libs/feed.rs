use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::libs::backend::backend_traits::{Backend, BackendError};
use crate::libs::backend::records::{LikeRecord, NewPost, NewStory};
use crate::libs::core::models::{non_empty, Identity, ModelError, Post, PostBody, PostKind, Story};
use crate::libs::session::SessionStore;
use crate::libs::toast::NotificationCenter;

pub const POST_SHARED: &str = "Post shared! 🚀";
pub const STORY_ADDED: &str = "Story added ✨";

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Sign in to continue")]
    NotSignedIn,
    #[error(transparent)]
    InvalidPost(#[from] ModelError),
    #[error("A story needs a media url")]
    MissingStoryMedia,
    #[error("Unknown post {0}")]
    UnknownPost(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Feed view was closed")]
    Cancelled,
}

/// Input for a new post.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostDraft {
    pub content: String,
    pub kind: PostKind,
    pub media_url: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
}

impl PostDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// The compose sheet. Survives failed publishes; reset after a successful one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposeForm {
    pub open: bool,
    pub draft: PostDraft,
}

#[derive(Debug, Default)]
struct FeedState {
    posts: Vec<Post>,
    stories: Vec<Story>,
    /// Generation of the fetch that produced `posts`.
    posts_generation: u64,
    compose: ComposeForm,
}

/// Posts and stories of the signed-in feed.
pub struct FeedRepository {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
    toasts: NotificationCenter,
    state: RwLock<FeedState>,
    generation: AtomicU64,
    cancel: CancellationToken,
    story_lifetime: chrono::Duration,
    version: watch::Sender<u64>,
}

impl FeedRepository {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<SessionStore>,
        toasts: NotificationCenter,
        cancel: CancellationToken,
        story_lifetime: chrono::Duration,
    ) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            backend,
            session,
            toasts,
            state: RwLock::new(FeedState::default()),
            generation: AtomicU64::new(0),
            cancel,
            story_lifetime,
            version,
        }
    }

    /// Bumped every time the visible posts or stories change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn posts(&self) -> Vec<Post> {
        self.state.read().await.posts.clone()
    }

    pub async fn stories(&self) -> Vec<Story> {
        self.state.read().await.stories.clone()
    }

    /// Reloads every post, newest first. Overlapping fetches may finish in any
    /// order; only a result newer than the one on screen replaces it.
    pub async fn fetch_posts(&self) -> Result<Vec<Post>, FeedError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let me = self.session.identity();

        let loaded = tokio::select! {
            _ = self.cancel.cancelled() => return Err(FeedError::Cancelled),
            loaded = self.load_posts(me.as_ref()) => loaded,
        };
        let posts = match loaded {
            Ok(posts) => posts,
            Err(e) => {
                warn!(error = %e, "fetching posts failed");
                self.toasts.error("Could not load the feed");
                return Err(e);
            }
        };

        if self.cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        let mut state = self.state.write().await;
        if generation > state.posts_generation {
            state.posts_generation = generation;
            state.posts = posts.clone();
            drop(state);
            self.version.send_modify(|v| *v += 1);
            debug!(generation, count = posts.len(), "feed refreshed");
        } else {
            debug!(generation, current = state.posts_generation, "discarding stale feed result");
        }
        Ok(posts)
    }

    async fn load_posts(&self, me: Option<&Identity>) -> Result<Vec<Post>, FeedError> {
        let records = self.backend.list_posts().await?;
        let liked: HashSet<String> = match me {
            Some(me) => self.backend.liked_post_ids(&me.id).await?.into_iter().collect(),
            None => HashSet::new(),
        };

        Ok(records
            .iter()
            .filter_map(|record| match Post::from_record(record, liked.contains(&record.id)) {
                Ok(post) => Some(post),
                Err(e) => {
                    warn!(post_id = %record.id, error = %e, "skipping malformed post");
                    None
                }
            })
            .collect())
    }

    /// Blank content is a no-op (`Ok(None)`). On success the compose form is
    /// reset and the feed is fetched once; on failure the form is left alone.
    pub async fn publish(&self, draft: PostDraft) -> Result<Option<Post>, FeedError> {
        if draft.is_blank() {
            debug!("ignoring blank post");
            return Ok(None);
        }
        let Some(me) = self.session.identity() else {
            self.toasts.error("Sign in to post");
            return Err(FeedError::NotSignedIn);
        };

        let body = match PostBody::from_parts(
            draft.kind,
            draft.media_url.as_deref(),
            draft.language.as_deref(),
        ) {
            Ok(body) => body,
            Err(e) => {
                self.toasts.error(e.to_string());
                return Err(e.into());
            }
        };
        let new_post = NewPost {
            user_id: me.id.clone(),
            content: draft.content.clone(),
            kind: body.kind(),
            media_url: body.media_url().map(str::to_string),
            title: non_empty(draft.title.as_deref()).map(str::to_string),
            language: body.language().map(str::to_string),
        };

        let record = match self.backend.insert_post(&new_post).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "publishing post failed");
                self.toasts.error(format!("Could not share post: {}", e));
                return Err(e.into());
            }
        };
        let post = Post::from_record(&record, false)?;
        info!(post_id = %post.id, kind = %post.kind(), "post published");

        self.state.write().await.compose = ComposeForm::default();
        self.toasts.success(POST_SHARED);
        if let Err(e) = self.fetch_posts().await {
            warn!(error = %e, "refresh after publish failed");
        }
        Ok(Some(post))
    }

    pub async fn compose(&self) -> ComposeForm {
        self.state.read().await.compose.clone()
    }

    pub async fn open_compose(&self, kind: PostKind) {
        let mut state = self.state.write().await;
        state.compose.open = true;
        state.compose.draft.kind = kind;
    }

    pub async fn edit_compose(&self, draft: PostDraft) {
        self.state.write().await.compose.draft = draft;
    }

    /// Hides the sheet but keeps what was typed.
    pub async fn close_compose(&self) {
        self.state.write().await.compose.open = false;
    }

    pub async fn publish_compose(&self) -> Result<Option<Post>, FeedError> {
        let draft = self.state.read().await.compose.draft.clone();
        self.publish(draft).await
    }

    /// Stories still visible at `now`. Expired rows are excluded by the query and
    /// again here.
    pub async fn fetch_stories(&self, now: DateTime<Utc>) -> Result<Vec<Story>, FeedError> {
        let loaded = tokio::select! {
            _ = self.cancel.cancelled() => return Err(FeedError::Cancelled),
            loaded = self.backend.list_active_stories(now) => loaded,
        };
        let records = match loaded {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "fetching stories failed");
                self.toasts.error("Could not load stories");
                return Err(e.into());
            }
        };

        let stories: Vec<Story> = records
            .iter()
            .map(Story::from_record)
            .filter(|story| story.is_visible_at(now))
            .collect();
        if self.cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        self.state.write().await.stories = stories.clone();
        self.version.send_modify(|v| *v += 1);
        Ok(stories)
    }

    pub async fn add_story(&self, media_url: &str) -> Result<Story, FeedError> {
        let me = self.session.identity().ok_or(FeedError::NotSignedIn)?;
        let media_url = non_empty(Some(media_url)).ok_or(FeedError::MissingStoryMedia)?;

        let story = NewStory {
            user_id: me.id,
            media_url: media_url.to_string(),
            expires_at: Utc::now() + self.story_lifetime,
        };
        let record = match self.backend.insert_story(&story).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "adding story failed");
                self.toasts.error(format!("Could not add story: {}", e));
                return Err(e.into());
            }
        };

        self.toasts.success(STORY_ADDED);
        if let Err(e) = self.fetch_stories(Utc::now()).await {
            warn!(error = %e, "refresh after story failed");
        }
        Ok(Story::from_record(&record))
    }

    /// Likes or unlikes a post, then shows the server's count. Returns the new count.
    pub async fn toggle_like(&self, post_id: &str) -> Result<u32, FeedError> {
        let me = self.session.identity().ok_or(FeedError::NotSignedIn)?;
        let liked = self
            .state
            .read()
            .await
            .posts
            .iter()
            .find(|post| post.id == post_id)
            .map(|post| post.liked_by_me)
            .ok_or_else(|| FeedError::UnknownPost(post_id.to_string()))?;

        let like = LikeRecord {
            post_id: post_id.to_string(),
            user_id: me.id,
        };
        let result = async {
            if liked {
                self.backend.unlike_post(&like).await?;
            } else {
                self.backend.like_post(&like).await?;
            }
            self.backend.count_likes(post_id).await
        }
        .await;
        let likes = match result {
            Ok(likes) => likes,
            Err(e) => {
                warn!(%post_id, error = %e, "updating like failed");
                self.toasts.error("Could not update like");
                return Err(e.into());
            }
        };

        let mut state = self.state.write().await;
        if let Some(post) = state.posts.iter_mut().find(|post| post.id == post_id) {
            post.likes = likes;
            post.liked_by_me = !liked;
        }
        drop(state);
        self.version.send_modify(|v| *v += 1);
        Ok(likes)
    }
}
