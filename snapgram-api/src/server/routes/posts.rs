use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    form::MultipartForm,
    json::{Created, Json},
    media::MediaStore,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use snapgram_common::model::{
    Id,
    image::{ImageMarker, MediaFolder, MediaRef},
    post::{Post, PostDraft, PostMarker, Reaction, ReactionCounts},
};
use snapgram_db::client::DbClient;
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_post)
        .typed_get(get_post)
        .typed_post(edit_post)
        .typed_post(delete_post)
        .typed_get(posts_by_tag)
        .typed_post(toggle_like)
}

async fn store_images(
    db: &DbClient,
    media_store: &MediaStore,
    form: &mut MultipartForm,
) -> Result<Vec<MediaRef>> {
    let mut images = Vec::new();
    for upload in form.take_files("image") {
        let image_id = db.generate_id::<ImageMarker>();
        images.push(
            media_store
                .store(MediaFolder::PostImage, image_id, upload)
                .await?,
        );
    }

    Ok(images)
}

/// A missing caption is an empty one, so posts may consist of images only.
fn caption(form: &MultipartForm) -> String {
    form.text("caption").unwrap_or_default().to_owned()
}

/// Loads a post the caller is allowed to change.
async fn fetch_owned_post(
    db: &DbClient,
    user: &AuthenticatedUser,
    id: Id<PostMarker>,
) -> Result<Post> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    if post.author.id != user.user_id() {
        return Err(ServerError::NotPostOwner(id));
    }

    Ok(post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/create_post/", rejection(ServerError))]
struct CreatePostPath();

/// Multipart fields `caption` and any number of `image` files.
async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(db): State<Arc<DbClient>>,
    State(media_store): State<Arc<MediaStore>>,
    user: AuthenticatedUser,
    mut form: MultipartForm,
) -> Result<Created<Post>> {
    let caption = caption(&form);
    let images = store_images(&db, &media_store, &mut form).await?;

    let post = db
        .create_post(user.user_id(), &PostDraft::new(caption, images))
        .await?;
    info!(post_id = %post.id, user_id = %user.user_id(), "Created post");

    Ok(Created(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/post/{id}/", rejection(ServerError))]
struct GetPostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    GetPostPath { id }: GetPostPath,
    State(db): State<Arc<DbClient>>,
    _user: AuthenticatedUser,
) -> Result<Json<Post>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/edit_post/{id}/", rejection(ServerError))]
struct EditPostPath {
    id: Id<PostMarker>,
}

/// Replaces the caption and appends any uploaded `image` files.
async fn edit_post(
    EditPostPath { id }: EditPostPath,
    State(db): State<Arc<DbClient>>,
    State(media_store): State<Arc<MediaStore>>,
    user: AuthenticatedUser,
    mut form: MultipartForm,
) -> Result<Json<Post>> {
    fetch_owned_post(&db, &user, id).await?;

    let caption = caption(&form);
    let images = store_images(&db, &media_store, &mut form).await?;

    let post = db
        .update_post(id, &PostDraft::new(caption, images))
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    info!(post_id = %id, "Edited post");

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/delete_post/{id}/", rejection(ServerError))]
struct DeletePostPath {
    id: Id<PostMarker>,
}

async fn delete_post(
    DeletePostPath { id }: DeletePostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    fetch_owned_post(&db, &user, id).await?;

    if !db.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }
    info!(post_id = %id, "Deleted post");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/posts_by_tag/{tag}/", rejection(ServerError))]
struct PostsByTagPath {
    tag: String,
}

/// Tag names match ignoring case.
async fn posts_by_tag(
    PostsByTagPath { tag }: PostsByTagPath,
    State(db): State<Arc<DbClient>>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<Post>>> {
    let tag = tag.strip_prefix('#').unwrap_or(&tag);
    let posts = db.fetch_posts_by_tag(tag).await?;

    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/toggle_like/{post_id}/{action}/", rejection(ServerError))]
struct ToggleLikePath {
    post_id: Id<PostMarker>,
    action: Reaction,
}

async fn toggle_like(
    ToggleLikePath { post_id, action }: ToggleLikePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<ReactionCounts>> {
    let counts = db
        .set_reaction(post_id, user.user_id(), action)
        .await?
        .ok_or(ServerError::PostByIdNotFound(post_id))?;

    Ok(Json(counts))
}
