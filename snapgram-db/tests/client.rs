//! Runs against the Postgres database in `DATABASE_URL`:
//! `DATABASE_URL=postgres://... cargo test -p snapgram-db -- --ignored`

use snapgram_common::{
    model::{
        Id,
        activation::ActivationCode,
        auth::{AuthToken, Session, StoredPassword},
        post::{PostDraft, Reaction},
        profile::{PersonName, SubscriptionAction, UpdateProfile},
        user::{CreateUser, EmailAddress, UserHandle, UserMarker},
    },
    snowflake::{ProcessId, WorkerId},
    util::PositiveDuration,
};
use snapgram_db::client::{DbClient, DbError};
use sqlx::PgPool;
use time::OffsetDateTime;

async fn client() -> DbClient {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL is set");
    let pool = PgPool::connect(&url).await.unwrap();

    let client = DbClient::new(pool, WorkerId::MIN, ProcessId::MIN);
    client.migrate().await.unwrap();
    client
}

fn create_user(handle: &str) -> CreateUser {
    CreateUser {
        handle: UserHandle::new(handle.to_owned()).unwrap(),
        email: EmailAddress::new("test@snapgram.test".to_owned()).unwrap(),
        first_name: PersonName::new_optional("Test").unwrap(),
        last_name: None,
        password: StoredPassword::hash("Testpassword_123").unwrap(),
    }
}

/// Registers a fresh user with a unique handle and returns it with its registration session.
async fn register(client: &DbClient) -> (Id<UserMarker>, Session) {
    let user_id = client.generate_id();
    let session = Session {
        user: user_id,
        token_hash: AuthToken::generate_random(user_id).hash().unwrap(),
        created_at: OffsetDateTime::now_utc(),
        expires_after: PositiveDuration::from_seconds(3600),
        activation_code: ActivationCode::new(4821),
    };

    client
        .register_user(user_id, &create_user(&format!("testuser{user_id}")), &session)
        .await
        .unwrap();

    (user_id, session)
}

fn draft(caption: &str) -> PostDraft {
    PostDraft::new(caption.to_owned(), Vec::new())
}

#[tokio::test]
#[ignore = "needs a Postgres database"]
async fn activation_clears_the_code() {
    let client = client().await;
    let (user_id, session) = register(&client).await;

    let stored = client.fetch_session(&session.token_hash).await.unwrap().unwrap();
    assert!(stored.is_pending_activation());

    let handle = format!("testuser{user_id}");
    let account = client.fetch_account_by_handle(&handle).await.unwrap().unwrap();
    assert!(!account.is_active);
    assert!(account.password.verify("Testpassword_123"));

    client.activate_user(user_id, &session.token_hash).await.unwrap();

    let stored = client.fetch_session(&session.token_hash).await.unwrap().unwrap();
    assert!(!stored.is_pending_activation());
    let account = client.fetch_account_by_handle(&handle).await.unwrap().unwrap();
    assert!(account.is_active);

    let profile = client.fetch_profile(user_id).await.unwrap().unwrap();
    assert_eq!(profile.first_name.unwrap().get(), "test");
}

#[tokio::test]
#[ignore = "needs a Postgres database"]
async fn handles_are_unique() {
    let client = client().await;
    let (user_id, session) = register(&client).await;

    let other_id = client.generate_id();
    let other_session = Session {
        user: other_id,
        token_hash: AuthToken::generate_random(other_id).hash().unwrap(),
        ..session
    };
    let result = client
        .register_user(other_id, &create_user(&format!("testuser{user_id}")), &other_session)
        .await;

    assert!(matches!(result, Err(DbError::HandleTaken(_))));
    assert!(client.fetch_user(other_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "needs a Postgres database"]
async fn reactions_are_exclusive() {
    let client = client().await;
    let (author, _) = register(&client).await;
    let (reader, _) = register(&client).await;
    let post = client.create_post(author, &draft("Hello")).await.unwrap();

    let counts = client
        .set_reaction(post.id, reader, Reaction::Like)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((counts.likes, counts.dislikes), (1, 0));

    let counts = client
        .set_reaction(post.id, reader, Reaction::Dislike)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((counts.likes, counts.dislikes), (0, 1));

    let counts = client
        .set_reaction(post.id, reader, Reaction::Dislike)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((counts.likes, counts.dislikes), (0, 1));

    let counts = client
        .set_reaction(post.id, author, Reaction::Like)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((counts.likes, counts.dislikes), (1, 1));

    let missing = client
        .set_reaction(client.generate_id(), reader, Reaction::Like)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
#[ignore = "needs a Postgres database"]
async fn removed_tags_vanish_from_every_post() {
    let client = client().await;
    let (author, _) = register(&client).await;
    let suffix = client.generate_id::<UserMarker>();
    let (kept, dropped) = (format!("kept{suffix}"), format!("dropped{suffix}"));

    let first = client
        .create_post(author, &draft(&format!("#{kept} #{dropped}")))
        .await
        .unwrap();
    let second = client
        .create_post(author, &draft(&format!("also #{dropped}")))
        .await
        .unwrap();
    assert_eq!(second.tags.len(), 1);

    let first = client
        .update_post(first.id, &draft(&format!("only #{kept}")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.caption, format!("only #{kept}"));
    assert_eq!(first.tags.len(), 1);
    assert_eq!(first.tags[0].get(), kept);

    let second = client.fetch_post(second.id).await.unwrap().unwrap();
    assert!(second.tags.is_empty());

    let tagged = client
        .fetch_posts_by_tag(&kept.to_uppercase())
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].id, first.id);

    let user_tags = client.fetch_user_tags(author).await.unwrap();
    assert_eq!(user_tags.len(), 1);
}

#[tokio::test]
#[ignore = "needs a Postgres database"]
async fn subscriptions_are_idempotent() {
    let client = client().await;
    let (subscriber, _) = register(&client).await;
    let (target, _) = register(&client).await;

    for _ in 0..2 {
        let status = client
            .set_subscription(subscriber, target, SubscriptionAction::Subscribe)
            .await
            .unwrap()
            .unwrap();
        assert!(status.is_subscribed);
        assert_eq!(status.subscribers_count, 1);
    }

    assert!(client.is_subscribed(subscriber, target).await.unwrap());
    assert_eq!(client.fetch_subscribers(target).await.unwrap()[0].id, subscriber);
    assert_eq!(client.fetch_subscriptions(subscriber).await.unwrap()[0].id, target);

    let status = client
        .set_subscription(subscriber, target, SubscriptionAction::Unsubscribe)
        .await
        .unwrap()
        .unwrap();
    assert!(!status.is_subscribed);
    assert_eq!(status.subscribers_count, 0);

    let missing = client
        .set_subscription(subscriber, client.generate_id(), SubscriptionAction::Subscribe)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
#[ignore = "needs a Postgres database"]
async fn profile_updates_keep_the_avatar() {
    let client = client().await;
    let (user_id, _) = register(&client).await;

    let update = UpdateProfile {
        first_name: PersonName::new("Jane").unwrap(),
        last_name: PersonName::new_optional("Doe").unwrap(),
        bio: Some("Hi".to_owned()),
        avatar: Some(
            snapgram_common::model::image::MediaRef::new("avatar_image/1-me.jpg".to_owned())
                .unwrap(),
        ),
    };
    client.update_profile(user_id, &update).await.unwrap();

    let profile = client
        .update_profile(
            user_id,
            &UpdateProfile {
                avatar: None,
                ..update
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.first_name.unwrap().get(), "jane");
    assert_eq!(profile.avatar.unwrap().get(), "avatar_image/1-me.jpg");
}

#[tokio::test]
#[ignore = "needs a Postgres database"]
async fn deleting_twice() {
    let client = client().await;
    let (author, _) = register(&client).await;
    let post = client.create_post(author, &draft("Bye")).await.unwrap();

    assert!(client.delete_post(post.id).await.unwrap());
    assert!(!client.delete_post(post.id).await.unwrap());
    assert!(client.fetch_post(post.id).await.unwrap().is_none());
}
