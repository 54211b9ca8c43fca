use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    form::MultipartForm,
    json::Json,
    media::MediaStore,
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use snapgram_common::model::{
    Id, ModelValidationError,
    image::{ImageMarker, MediaFolder},
    post::Post,
    profile::{PersonName, Profile, SubscriptionAction, SubscriptionStatus, UpdateProfile},
    tag::TagName,
    user::{User, UserMarker},
};
use snapgram_db::client::DbClient;
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(own_profile)
        .typed_get(user_profile)
        .typed_post(edit_profile)
        .typed_post(subscribe_toggle)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/", rejection(ServerError))]
struct OwnProfilePath();

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct OwnProfile {
    profile: Profile,
    /// All posts of all users, newest first.
    feed: Vec<Post>,
}

async fn own_profile(
    OwnProfilePath(): OwnProfilePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<OwnProfile>> {
    let profile = db
        .fetch_profile(user.user_id())
        .await?
        .ok_or(ServerError::UserByIdNotFound(user.user_id()))?;
    let feed = db.fetch_feed().await?;

    Ok(Json(OwnProfile { profile, feed }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/user_profile/{id}/", rejection(ServerError))]
struct UserProfilePath {
    id: Id<UserMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct UserProfile {
    profile: Profile,
    posts: Vec<Post>,
    is_subscribed: bool,
    subscribers: Vec<User>,
    subscriptions: Vec<User>,
    tags: Vec<TagName>,
}

async fn user_profile(
    UserProfilePath { id }: UserProfilePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<UserProfile>> {
    let profile = db
        .fetch_profile(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    let posts = db.fetch_user_posts(id).await?;
    let is_subscribed = db.is_subscribed(user.user_id(), id).await?;
    let subscribers = db.fetch_subscribers(id).await?;
    let subscriptions = db.fetch_subscriptions(id).await?;
    let tags = db.fetch_user_tags(id).await?;

    Ok(Json(UserProfile {
        profile,
        posts,
        is_subscribed,
        subscribers,
        subscriptions,
        tags,
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/edit_profile/", rejection(ServerError))]
struct EditProfilePath();

/// Multipart fields `first_name` (required), `last_name`, `bio` and an optional `avatar` file.
async fn edit_profile(
    EditProfilePath(): EditProfilePath,
    State(db): State<Arc<DbClient>>,
    State(media_store): State<Arc<MediaStore>>,
    user: AuthenticatedUser,
    mut form: MultipartForm,
) -> Result<Json<Profile>> {
    let first_name = PersonName::new(form.required_text("first_name")?)
        .map_err(ModelValidationError::from)?;
    let last_name = PersonName::new_optional(form.text("last_name").unwrap_or_default())
        .map_err(ModelValidationError::from)?;
    let bio = form
        .text("bio")
        .map(str::trim)
        .filter(|bio| !bio.is_empty())
        .map(str::to_owned);

    let avatar = match form.take_files("avatar").into_iter().next() {
        Some(upload) => {
            let image_id = db.generate_id::<ImageMarker>();
            Some(
                media_store
                    .store(MediaFolder::AvatarImage, image_id, upload)
                    .await?,
            )
        }
        None => None,
    };

    let update = UpdateProfile {
        first_name,
        last_name,
        bio,
        avatar,
    };
    let profile = db
        .update_profile(user.user_id(), &update)
        .await?
        .ok_or(ServerError::UserByIdNotFound(user.user_id()))?;
    info!(user_id = %user.user_id(), "Updated profile");

    Ok(Json(profile))
}

#[derive(TypedPath, Deserialize)]
#[typed_path(
    "/user/user_profile/{id}/subscribe_toggle/{action}/",
    rejection(ServerError)
)]
struct SubscribeTogglePath {
    id: Id<UserMarker>,
    action: SubscriptionAction,
}

/// Both actions are idempotent; the reply reflects the state after the change.
async fn subscribe_toggle(
    SubscribeTogglePath { id, action }: SubscribeTogglePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<SubscriptionStatus>> {
    let status = db
        .set_subscription(user.user_id(), id, action)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(status))
}
