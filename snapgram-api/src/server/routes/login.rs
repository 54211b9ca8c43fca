use crate::server::{
    Result, ServerError, ServerRouter, SessionLifetime,
    auth::AuthenticatedUser,
    json::Json,
    routes::registration::LoggedIn,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use snapgram_common::model::auth::{AuthToken, Session, StoredPassword};
use snapgram_db::client::DbClient;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_post(login).typed_post(logout)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/login/", rejection(ServerError))]
struct LoginPath();

#[derive(Clone, Eq, PartialEq, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

/// Unknown user, wrong password and inactive account are indistinguishable to the caller.
async fn login(
    LoginPath(): LoginPath,
    State(db): State<Arc<DbClient>>,
    State(SessionLifetime(lifetime)): State<SessionLifetime>,
    Json(form): Json<LoginForm>,
) -> Result<Json<LoggedIn>> {
    let account = db.fetch_account_by_handle(&form.username).await?;
    let verified = match &account {
        Some(account) => account.password.verify(&form.password),
        None => StoredPassword::verify_missing(&form.password),
    };
    let account = account
        .filter(|account| verified && account.is_active)
        .ok_or(ServerError::InvalidCredentials)?;

    let user_id = account.user.id;
    let token = AuthToken::generate_random(user_id);
    let session = Session {
        user: user_id,
        token_hash: token.hash()?,
        created_at: OffsetDateTime::now_utc(),
        expires_after: Some(lifetime),
        activation_code: None,
    };
    db.create_session(&session).await?;
    info!(%user_id, "Logged in");

    Ok(Json(LoggedIn {
        user_id,
        token: token.as_token_str(),
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/logout/", rejection(ServerError))]
struct LogoutPath();

async fn logout(
    LogoutPath(): LogoutPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    db.delete_session(user.token_hash()).await?;
    info!(user_id = %user.user_id(), "Logged out");

    Ok(StatusCode::NO_CONTENT)
}
