use crate::common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vibogram_core::libs::app::{App, AppContext};
use vibogram_core::libs::assistant::UnconfiguredAi;
use vibogram_core::libs::backend::backend_traits::{AuthApi, PostApi};
use vibogram_core::libs::backend::records::NewPost;
use vibogram_core::libs::backend::sqlite::SqliteBackendOptions;
use vibogram_core::libs::core::config::AppConfig;
use vibogram_core::libs::core::error::AppError;
use vibogram_core::libs::core::models::{PostBody, PostKind};
use vibogram_core::libs::router::{Screen, View};
use vibogram_core::libs::session::SessionState;

mod common;

fn build_app(config: AppConfig, backend: &Arc<TestBackend>) -> Arc<App> {
    App::new(AppContext::new(config, backend.clone(), Arc::new(UnconfiguredAi)))
}

fn text_post(user_id: &str, content: &str) -> NewPost {
    NewPost {
        user_id: user_id.to_string(),
        content: content.to_string(),
        kind: PostKind::Text,
        media_url: None,
        title: None,
        language: None,
    }
}

async fn post_count(app: &App) -> usize {
    match app.feed().await {
        Ok(feed) => feed.posts().await.len(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn missing_configuration_gets_its_own_screen() {
    let (_dir, backend) = test_backend();
    let app = build_app(AppConfig::default(), &backend);

    let screen = app.start().await;
    assert_eq!(
        screen,
        Screen::ConfigurationError {
            missing: vec!["supabase_url".to_string(), "supabase_anon_key".to_string()]
        }
    );
    assert!(app.session().current().is_loading());
    assert_eq!(backend.list_posts_calls(), 0);
}

#[tokio::test]
async fn stalled_session_check_still_reaches_sign_in() {
    let (_dir, backend) = test_backend();
    backend.delay_session(Duration::from_secs(30));
    let config = AppConfig {
        init_timeout_ms: 100,
        ..ready_config()
    };
    let app = build_app(config, &backend);

    let started = Instant::now();
    assert_eq!(app.start().await, Screen::Login);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(app.feed().await, Err(AppError::NotMounted)));
}

#[tokio::test]
async fn restored_session_mounts_the_feed() {
    let (_dir, backend) = test_backend();
    let session = register(&backend.inner, "back@vibo.dev", "Back Again").await;
    backend
        .inner
        .insert_post(&text_post(&session.user.id, "welcome back"))
        .await
        .expect("insert");

    let app = build_app(ready_config(), &backend);
    assert_eq!(app.start().await, Screen::Main(View::Feed));
    assert_eq!(post_count(&app).await, 1);
    assert!(app.is_live().await);
    assert!(app.conversations().await.is_ok());
}

#[tokio::test]
async fn sign_in_mounts_and_sign_out_unmounts() {
    let (_dir, backend) = test_backend();
    register(&backend.inner, "cycle@vibo.dev", "Cycle").await;
    backend.inner.sign_out().await.expect("sign out");

    let app = build_app(ready_config(), &backend);
    assert_eq!(app.start().await, Screen::Login);
    assert!(matches!(app.feed().await, Err(AppError::NotMounted)));

    app.sign_in("cycle@vibo.dev", PASSWORD).await.expect("sign in");
    app.select_view(View::Profile);
    assert_eq!(app.screen(), Screen::Main(View::Profile));
    let feed = app.feed().await.expect("mounted");

    app.sign_out().await;
    assert_eq!(app.screen(), Screen::Login);
    assert!(matches!(app.feed().await, Err(AppError::NotMounted)));
    assert!(feed.cancel_token().is_cancelled());
    assert!(!app.is_live().await);

    app.sign_in("cycle@vibo.dev", PASSWORD).await.expect("sign in again");
    assert_eq!(app.screen(), Screen::Main(View::Feed));
}

#[tokio::test]
async fn stores_stay_reachable_while_the_first_fetch_stalls() {
    let (_dir, backend) = test_backend();
    register(&backend.inner, "slow@vibo.dev", "Slow").await;
    backend.inner.sign_out().await.expect("sign out");
    let app = build_app(ready_config(), &backend);
    assert_eq!(app.start().await, Screen::Login);

    backend.delay_next_list_posts(Duration::from_secs(2));
    let signing_in = {
        let app = app.clone();
        tokio::spawn(async move { app.sign_in("slow@vibo.dev", PASSWORD).await })
    };

    let observed = app.clone();
    eventually("stores reachable", || {
        let observed = observed.clone();
        async move {
            tokio::time::timeout(Duration::from_millis(100), observed.conversations())
                .await
                .map(|stores| stores.is_ok())
                .unwrap_or(false)
        }
    })
    .await;
    assert!(!signing_in.is_finished());

    let started = Instant::now();
    let feed = app.feed().await.expect("mounted");
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(feed.posts().await.is_empty());

    signing_in.await.expect("join").expect("sign in");
    assert!(app.is_live().await);
}

#[tokio::test]
async fn inserts_anywhere_refresh_the_feed() {
    let (_dir, backend) = test_backend();
    let other = second_client(&backend);
    let author = register(&other.inner, "poster@vibo.dev", "Poster").await;
    register(&backend.inner, "reader@vibo.dev", "Reader").await;

    let app = build_app(ready_config(), &backend);
    app.start().await;
    assert_eq!(post_count(&app).await, 0);

    other
        .inner
        .insert_post(&text_post(&author.user.id, "breaking news"))
        .await
        .expect("insert");
    let observed = app.clone();
    eventually("realtime refresh", || {
        let observed = observed.clone();
        async move { post_count(&observed).await == 1 }
    })
    .await;
}

#[tokio::test]
async fn logout_login_cycle_keeps_a_single_listener() {
    let (_dir, backend) = test_backend();
    let other = second_client(&backend);
    let author = register(&other.inner, "poster@vibo.dev", "Poster").await;
    register(&backend.inner, "reader@vibo.dev", "Reader").await;

    let app = build_app(ready_config(), &backend);
    app.start().await;
    app.sign_out().await;
    app.sign_in("reader@vibo.dev", PASSWORD).await.expect("sign in");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = backend.list_posts_calls();
    other
        .inner
        .insert_post(&text_post(&author.user.id, "only once"))
        .await
        .expect("insert");

    let observed = app.clone();
    eventually("realtime refresh", || {
        let observed = observed.clone();
        async move { post_count(&observed).await == 1 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.list_posts_calls(), before + 1);
}

#[tokio::test]
async fn realtime_failure_is_notified_but_not_fatal() {
    let (_dir, backend) = test_backend();
    register(&backend.inner, "offline@vibo.dev", "Offline").await;
    backend.fail_subscribe.store(true, Ordering::SeqCst);

    let app = build_app(ready_config(), &backend);
    assert_eq!(app.start().await, Screen::Main(View::Feed));
    assert!(!app.is_live().await);
    assert!(app.feed().await.is_ok());
    assert!(toast_messages(app.toasts()).contains(&"Live updates unavailable".to_string()));
}

#[tokio::test]
async fn verification_screen_until_code_or_back() {
    let (_dir, backend) = test_backend_with(SqliteBackendOptions {
        require_email_confirmation: true,
        ..SqliteBackendOptions::default()
    });
    let app = build_app(ready_config(), &backend);
    app.start().await;

    app.sign_up(&sign_up_form("new@vibo.dev", "Newcomer"))
        .await
        .expect("sign up");
    let verify = Screen::VerifyCode {
        email: "new@vibo.dev".to_string(),
    };
    assert_eq!(app.screen(), verify);

    app.resend_code("new@vibo.dev").await.expect("resend");
    assert!(app.verify_code("new@vibo.dev", "nope").await.is_err());
    assert_eq!(app.screen(), verify);

    app.cancel_verification();
    assert_eq!(app.screen(), Screen::Login);
    assert_eq!(app.session().current(), SessionState::SignedOut);

    let code = backend
        .inner
        .pending_code("new@vibo.dev")
        .await
        .expect("query")
        .expect("code");
    app.verify_code("new@vibo.dev", &code).await.expect("verify");
    assert_eq!(app.screen(), Screen::Main(View::Feed));
    assert!(app.feed().await.is_ok());
}

#[tokio::test]
async fn sandbox_shares_as_code_post() {
    let (_dir, backend) = test_backend();
    register(&backend.inner, "dev@vibo.dev", "Dev").await;
    let app = build_app(ready_config(), &backend);
    app.start().await;

    app.select_view(View::CodeSandbox);
    app.edit_code("fn main() {}");
    app.save_code();
    assert!(!app.sandbox().is_dirty());

    let post = app
        .share_sandbox(Some("Hello Rust".to_string()))
        .await
        .expect("share")
        .expect("post");
    assert_eq!(post.content, "fn main() {}");
    assert_eq!(
        post.body,
        PostBody::Code {
            language: Some("javascript".to_string())
        }
    );
    assert_eq!(post.title.as_deref(), Some("Hello Rust"));
    assert_eq!(post_count(&app).await, 1);
}

#[tokio::test]
async fn sidebar_closes_on_navigation() {
    let (_dir, backend) = test_backend();
    register(&backend.inner, "nav@vibo.dev", "Nav").await;
    let app = build_app(ready_config(), &backend);
    app.start().await;

    app.toggle_sidebar();
    assert!(app.sidebar_open());
    app.select_view(View::Chat);
    assert!(!app.sidebar_open());
    assert_eq!(app.screen(), Screen::Main(View::Chat));
}
