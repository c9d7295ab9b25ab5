use crate::common::*;
use chrono::Duration as ChronoDuration;
use std::time::Duration;
use vibogram_core::libs::backend::backend_traits::{
    AuthApi, BackendError, ChangeFilter, MessageApi, PostApi, ProfileApi, RealtimeApi,
};
use vibogram_core::libs::backend::records::{
    LikeRecord, MessageRecord, NewMessage, NewPost, SignUpOutcome,
};
use vibogram_core::libs::backend::sqlite::{SqliteBackend, SqliteBackendOptions};
use vibogram_core::libs::core::error::AuthError;
use vibogram_core::libs::core::models::PostKind;

mod common;

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

#[tokio::test]
async fn sign_up_creates_profile_and_rejects_duplicates() {
    let (_dir, backend) = open_backend(SqliteBackendOptions::default());
    let session = register(&backend, "Dup@Vibo.dev", "Dup").await;
    assert_eq!(session.user.email.as_deref(), Some("dup@vibo.dev"));

    let profile = backend
        .load_profile(&session.user.id)
        .await
        .expect("query")
        .expect("profile row");
    assert_eq!(profile.full_name.as_deref(), Some("Dup"));

    let err = backend
        .sign_up(&sign_up_request("dup@vibo.dev", "Again"))
        .await
        .expect_err("duplicate");
    assert!(matches!(
        err,
        BackendError::Auth(AuthError::UserAlreadyExists(_))
    ));
}

#[tokio::test]
async fn writes_need_the_owner_session() {
    let (_dir, backend) = open_backend(SqliteBackendOptions::default());
    let session = register(&backend, "owner@vibo.dev", "Owner").await;

    let err = backend
        .insert_post(&text_post("someone-else", "spoof"))
        .await
        .expect_err("other user");
    assert!(matches!(err, BackendError::Forbidden(_)));

    backend.sign_out().await.expect("sign out");
    let err = backend
        .insert_post(&text_post(&session.user.id, "signed out"))
        .await
        .expect_err("no session");
    assert!(matches!(err, BackendError::NotAuthenticated));
    assert!(backend.list_posts().await.expect("list").is_empty());
}

#[tokio::test]
async fn expired_code_is_rejected() {
    let (_dir, backend) = open_backend(SqliteBackendOptions {
        require_email_confirmation: true,
        code_lifetime: ChronoDuration::zero(),
        ..SqliteBackendOptions::default()
    });
    let outcome = backend
        .sign_up(&sign_up_request("slow@vibo.dev", "Slow"))
        .await
        .expect("sign up");
    assert_eq!(
        outcome,
        SignUpOutcome::ConfirmationRequired {
            email: "slow@vibo.dev".to_string()
        }
    );
    assert!(backend.current_session().await.expect("session").is_none());

    let code = backend
        .pending_code("slow@vibo.dev")
        .await
        .expect("query")
        .expect("code");
    let err = backend
        .verify_otp("slow@vibo.dev", &code)
        .await
        .expect_err("expired");
    assert!(matches!(err, BackendError::Auth(AuthError::InvalidCode)));
}

#[tokio::test]
async fn likes_are_counted_once_per_user() {
    let (_dir, backend) = open_backend(SqliteBackendOptions::default());
    let session = register(&backend, "liker@vibo.dev", "Liker").await;
    let post = backend
        .insert_post(&text_post(&session.user.id, "like me"))
        .await
        .expect("insert");
    let like = LikeRecord {
        post_id: post.id.clone(),
        user_id: session.user.id.clone(),
    };

    backend.like_post(&like).await.expect("like");
    backend.like_post(&like).await.expect("like again");
    assert_eq!(backend.count_likes(&post.id).await.expect("count"), 1);
    assert_eq!(
        backend.liked_post_ids(&session.user.id).await.expect("ids"),
        vec![post.id.clone()]
    );
    assert_eq!(backend.list_posts().await.expect("list")[0].likes, 1);

    backend.unlike_post(&like).await.expect("unlike");
    assert_eq!(backend.count_likes(&post.id).await.expect("count"), 0);
}

#[tokio::test]
async fn changes_reach_other_clients_through_filters() {
    let (_dir, alice) = open_backend(SqliteBackendOptions::default());
    let bob = alice.new_client();
    let alice_session = register(&alice, "alice@vibo.dev", "Alice").await;
    let bob_session = register(&bob, "bob@vibo.dev", "Bob").await;

    let mut inbox = alice
        .subscribe(ChangeFilter::inserts("messages").eq("sender_id", &bob_session.user.id))
        .await
        .expect("subscribe");

    alice
        .insert_message(&NewMessage {
            sender_id: alice_session.user.id.clone(),
            receiver_id: bob_session.user.id.clone(),
            content: "outbound".to_string(),
        })
        .await
        .expect("send");
    bob.insert_message(&NewMessage {
        sender_id: bob_session.user.id.clone(),
        receiver_id: alice_session.user.id.clone(),
        content: "inbound".to_string(),
    })
    .await
    .expect("send");

    let event = tokio::time::timeout(Duration::from_secs(2), inbox.next())
        .await
        .expect("event in time")
        .expect("event");
    let message: MessageRecord = event.record_as().expect("message row");
    assert_eq!(message.content, "inbound");

    inbox.unsubscribe();
    assert!(inbox.next().await.is_none());

    let thread = alice
        .list_conversation(&bob_session.user.id, &alice_session.user.id)
        .await
        .expect("thread");
    let texts: Vec<_> = thread.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["outbound", "inbound"]);
}

#[tokio::test]
async fn sent_message_matches_its_stored_row() {
    let (_dir, alice) = open_backend(SqliteBackendOptions::default());
    let bob = alice.new_client();
    let alice_session = register(&alice, "alice@vibo.dev", "Alice").await;
    let bob_session = register(&bob, "bob@vibo.dev", "Bob").await;

    let mut inbox = bob
        .subscribe(ChangeFilter::inserts("messages").eq("receiver_id", &bob_session.user.id))
        .await
        .expect("subscribe");
    let sent = alice
        .insert_message(&NewMessage {
            sender_id: alice_session.user.id.clone(),
            receiver_id: bob_session.user.id.clone(),
            content: "same everywhere".to_string(),
        })
        .await
        .expect("send");

    let thread = alice
        .list_conversation(&alice_session.user.id, &bob_session.user.id)
        .await
        .expect("thread");
    assert_eq!(thread, vec![sent.clone()]);

    let event = tokio::time::timeout(Duration::from_secs(2), inbox.next())
        .await
        .expect("event in time")
        .expect("event");
    let delivered: MessageRecord = event.record_as().expect("message row");
    assert_eq!(delivered, sent);
}

#[tokio::test]
async fn data_survives_reopening() {
    let (dir, backend) = open_backend(SqliteBackendOptions::default());
    let session = register(&backend, "keep@vibo.dev", "Keeper").await;
    backend
        .insert_post(&text_post(&session.user.id, "persisted"))
        .await
        .expect("insert");
    drop(backend);

    let reopened = SqliteBackend::open(dir.path().join("vibogram.db"), SqliteBackendOptions::default())
        .expect("reopen");
    assert!(reopened.current_session().await.expect("session").is_none());
    let posts = reopened.list_posts().await.expect("list");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].content, "persisted");
    assert_eq!(
        posts[0].author.as_ref().and_then(|a| a.full_name.as_deref()),
        Some("Keeper")
    );

    reopened
        .sign_in_with_password("keep@vibo.dev", PASSWORD)
        .await
        .expect("sign in after reopen");
}
