use crate::common::*;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vibogram_core::libs::backend::backend_traits::{PostApi, StoryApi};
use vibogram_core::libs::backend::records::{NewPost, NewStory};
use vibogram_core::libs::core::models::{placeholder_avatar, Identity, PostBody, PostKind};
use vibogram_core::libs::feed::{FeedError, FeedRepository, PostDraft, POST_SHARED};
use vibogram_core::libs::session::SessionStore;
use vibogram_core::libs::toast::NotificationCenter;

mod common;

struct Fixture {
    _dir: tempfile::TempDir,
    backend: Arc<TestBackend>,
    session: Arc<SessionStore>,
    me: Identity,
    toasts: NotificationCenter,
    cancel: CancellationToken,
    feed: Arc<FeedRepository>,
}

async fn fixture() -> Fixture {
    let (dir, backend) = test_backend();
    let (session, me) = signed_in_store(backend.clone(), "codeman@vibo.dev", "Codeman").await;
    let toasts = toasts();
    let cancel = CancellationToken::new();
    let feed = Arc::new(FeedRepository::new(
        backend.clone(),
        session.clone(),
        toasts.clone(),
        cancel.clone(),
        ChronoDuration::hours(24),
    ));
    Fixture {
        _dir: dir,
        backend,
        session,
        me,
        toasts,
        cancel,
        feed,
    }
}

fn new_post(user_id: &str, content: &str) -> NewPost {
    NewPost {
        user_id: user_id.to_string(),
        content: content.to_string(),
        kind: PostKind::Text,
        media_url: None,
        title: None,
        language: None,
    }
}

#[tokio::test]
async fn blank_post_is_not_inserted() {
    let f = fixture().await;

    for content in ["", "   ", "\n\t "] {
        let published = f.feed.publish(PostDraft::text(content)).await.expect("no-op");
        assert!(published.is_none());
    }
    assert!(f.backend.inner.list_posts().await.expect("list").is_empty());
    assert_eq!(f.backend.list_posts_calls(), 0);
}

#[tokio::test]
async fn publishing_text_resets_compose_and_refetches_once() {
    let f = fixture().await;
    f.feed.open_compose(PostKind::Text).await;
    f.feed.edit_compose(PostDraft::text("Hello world")).await;

    let post = f
        .feed
        .publish_compose()
        .await
        .expect("publish")
        .expect("post created");
    assert_eq!(post.kind(), PostKind::Text);
    assert_eq!(post.body, PostBody::Text);
    assert_eq!(post.media_url(), None);
    assert_eq!(post.likes, 0);
    assert_eq!(post.author.id, f.me.id);

    let compose = f.feed.compose().await;
    assert!(!compose.open);
    assert!(compose.draft.is_blank());
    assert_eq!(f.backend.list_posts_calls(), 1);

    let posts = f.feed.posts().await;
    assert_eq!(posts.first().map(|p| p.id.as_str()), Some(post.id.as_str()));
    assert!(toast_messages(&f.toasts).contains(&POST_SHARED.to_string()));
}

#[tokio::test]
async fn failed_publish_keeps_typed_input() {
    let f = fixture().await;
    f.feed.open_compose(PostKind::Image).await;
    let draft = PostDraft {
        content: "Sunset over the office".to_string(),
        kind: PostKind::Image,
        media_url: Some("https://img.vibo.dev/sunset.png".to_string()),
        title: None,
        language: None,
    };
    f.feed.edit_compose(draft.clone()).await;
    f.backend.fail_post_inserts.store(true, Ordering::SeqCst);

    let result = f.feed.publish_compose().await;
    assert!(matches!(result, Err(FeedError::Backend(_))));

    let compose = f.feed.compose().await;
    assert!(compose.open);
    assert_eq!(compose.draft, draft);
    assert_eq!(f.backend.list_posts_calls(), 0);
    assert!(f.toasts.latest().is_some());
}

#[tokio::test]
async fn media_post_without_url_is_rejected_locally() {
    let f = fixture().await;
    let draft = PostDraft {
        kind: PostKind::Video,
        ..PostDraft::text("watch this")
    };

    let result = f.feed.publish(draft).await;
    assert!(matches!(result, Err(FeedError::InvalidPost(_))));
    assert!(f.backend.inner.list_posts().await.expect("list").is_empty());
}

#[tokio::test]
async fn code_post_keeps_language_and_drops_media() {
    let f = fixture().await;
    let draft = PostDraft {
        content: "print('tip')".to_string(),
        kind: PostKind::Code,
        media_url: Some("https://ignored".to_string()),
        title: Some("5 Essential Python Tips".to_string()),
        language: Some("python".to_string()),
    };

    let post = f.feed.publish(draft).await.expect("publish").expect("post");
    assert_eq!(
        post.body,
        PostBody::Code {
            language: Some("python".to_string())
        }
    );
    assert_eq!(post.media_url(), None);
    assert_eq!(post.title.as_deref(), Some("5 Essential Python Tips"));
}

#[tokio::test]
async fn feed_is_newest_first_with_author_fields() {
    let f = fixture().await;
    let other = second_client(&f.backend);
    let (_, emily) = signed_in_store(other.clone(), "emily@vibo.dev", "Emily").await;

    f.backend
        .inner
        .insert_post(&new_post(&f.me.id, "first"))
        .await
        .expect("insert");
    tokio::time::sleep(Duration::from_millis(5)).await;
    other
        .inner
        .insert_post(&new_post(&emily.id, "second"))
        .await
        .expect("insert");

    let posts = f.feed.fetch_posts().await.expect("fetch");
    let contents: Vec<_> = posts.iter().map(|p| p.content.as_str()).collect();
    assert_eq!(contents, vec!["second", "first"]);
    assert_eq!(posts[0].author.name, "Emily");
    assert_eq!(posts[0].author.avatar, placeholder_avatar(&emily.id));
}

#[tokio::test]
async fn slower_older_fetch_does_not_overwrite_newer_result() {
    let f = fixture().await;
    f.backend.delay_next_list_posts(Duration::from_millis(300));

    let slow_feed = f.feed.clone();
    let slow = tokio::spawn(async move { slow_feed.fetch_posts().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    f.backend
        .inner
        .insert_post(&new_post(&f.me.id, "fresh"))
        .await
        .expect("insert");
    let fresh = f.feed.fetch_posts().await.expect("fresh fetch");
    assert_eq!(fresh.len(), 1);

    let stale = slow.await.expect("join").expect("stale fetch");
    assert!(stale.is_empty());
    assert_eq!(f.feed.posts().await.len(), 1);
}

#[tokio::test]
async fn cancelled_feed_ignores_fetches() {
    let f = fixture().await;
    f.backend
        .inner
        .insert_post(&new_post(&f.me.id, "hello"))
        .await
        .expect("insert");

    f.cancel.cancel();
    assert!(matches!(f.feed.fetch_posts().await, Err(FeedError::Cancelled)));
    assert!(matches!(
        f.feed.fetch_stories(Utc::now()).await,
        Err(FeedError::Cancelled)
    ));
    assert!(f.feed.posts().await.is_empty());
}

#[tokio::test]
async fn fetch_failure_notifies_and_keeps_previous_posts() {
    let f = fixture().await;
    f.feed
        .publish(PostDraft::text("kept"))
        .await
        .expect("publish");
    f.backend.fail_list_posts.store(true, Ordering::SeqCst);

    assert!(matches!(f.feed.fetch_posts().await, Err(FeedError::Backend(_))));
    assert_eq!(f.feed.posts().await.len(), 1);
    assert!(toast_messages(&f.toasts).contains(&"Could not load the feed".to_string()));
}

#[tokio::test]
async fn expired_stories_are_not_shown() {
    let f = fixture().await;
    f.backend
        .inner
        .insert_story(&NewStory {
            user_id: f.me.id.clone(),
            media_url: "https://img.vibo.dev/old.png".to_string(),
            expires_at: Utc::now() - ChronoDuration::minutes(1),
        })
        .await
        .expect("insert expired");

    let story = f
        .feed
        .add_story("https://img.vibo.dev/new.png")
        .await
        .expect("add story");
    assert!(story.expires_at > Utc::now() + ChronoDuration::hours(23));

    let stories = f.feed.stories().await;
    assert_eq!(stories.len(), 1);
    assert_eq!(stories[0].media_url, "https://img.vibo.dev/new.png");

    let later = f
        .feed
        .fetch_stories(Utc::now() + ChronoDuration::hours(25))
        .await
        .expect("fetch");
    assert!(later.is_empty());

    assert!(matches!(
        f.feed.add_story("  ").await,
        Err(FeedError::MissingStoryMedia)
    ));
}

#[tokio::test]
async fn likes_are_persisted() {
    let f = fixture().await;
    let post = f
        .feed
        .publish(PostDraft::text("like me"))
        .await
        .expect("publish")
        .expect("post");

    assert_eq!(f.feed.toggle_like(&post.id).await.expect("like"), 1);
    let posts = f.feed.fetch_posts().await.expect("fetch");
    assert_eq!(posts[0].likes, 1);
    assert!(posts[0].liked_by_me);

    assert_eq!(f.feed.toggle_like(&post.id).await.expect("unlike"), 0);
    assert!(!f.feed.posts().await[0].liked_by_me);

    assert!(matches!(
        f.feed.toggle_like("missing").await,
        Err(FeedError::UnknownPost(_))
    ));
}

#[tokio::test]
async fn signed_out_user_cannot_publish() {
    let f = fixture().await;
    f.session.sign_out().await;

    assert!(matches!(
        f.feed.publish(PostDraft::text("hello")).await,
        Err(FeedError::NotSignedIn)
    ));
}
