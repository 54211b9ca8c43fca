use crate::server::{
    Result, ServerError, ServerRouter, SessionLifetime,
    auth::RegistrationSession,
    json::{Created, Json},
    mail::Mailer,
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use snapgram_common::model::{
    Id, ModelValidationError,
    activation::ActivationCode,
    auth::{AuthToken, Session, StoredPassword},
    password::check_passwords,
    profile::PersonName,
    user::{CreateUser, EmailAddress, UserHandle, UserMarker},
};
use snapgram_db::client::{DbClient, DbError};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(register)
        .typed_post(activate_account)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/registration/", rejection(ServerError))]
struct RegistrationPath();

/// Fields are validated by the handler so that every problem gets a readable message.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
struct RegistrationForm {
    username: String,
    email: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    password1: String,
    password2: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct Registered {
    user_id: Id<UserMarker>,
    username: UserHandle,
    email: EmailAddress,
    /// Authenticates the activation request only.
    token: String,
}

async fn register(
    RegistrationPath(): RegistrationPath,
    State(db): State<Arc<DbClient>>,
    State(mailer): State<Arc<Mailer>>,
    State(SessionLifetime(lifetime)): State<SessionLifetime>,
    Json(form): Json<RegistrationForm>,
) -> Result<Created<Registered>> {
    check_passwords(&form.password1, &form.password2)?;

    let handle = UserHandle::new(form.username).map_err(ModelValidationError::from)?;
    let email = EmailAddress::new(form.email).map_err(ModelValidationError::from)?;
    let first_name = PersonName::new_optional(&form.first_name).map_err(ModelValidationError::from)?;
    let last_name = PersonName::new_optional(&form.last_name).map_err(ModelValidationError::from)?;

    if db.handle_exists(&handle).await? {
        return Err(DbError::HandleTaken(handle.into_inner()).into());
    }

    let user_id = db.generate_id::<UserMarker>();
    let token = AuthToken::generate_random(user_id);
    let activation_code = ActivationCode::generate();

    let session = Session {
        user: user_id,
        token_hash: token.hash()?,
        created_at: OffsetDateTime::now_utc(),
        expires_after: Some(lifetime),
        activation_code: Some(activation_code),
    };
    let user = CreateUser {
        handle,
        email,
        first_name,
        last_name,
        password: StoredPassword::hash(&form.password1)?,
    };
    // Nothing is stored if the code cannot be delivered.
    mailer
        .send_activation_code(&user.email, activation_code)
        .await?;
    db.register_user(user_id, &user, &session).await?;
    info!(%user_id, handle = user.handle.get(), "Registered user, waiting for activation");

    Ok(Created(Registered {
        user_id,
        username: user.handle,
        email: user.email,
        token: token.as_token_str(),
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/registration/activate_account/", rejection(ServerError))]
struct ActivateAccountPath();

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct ActivationForm {
    user_entered_code: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
pub(super) struct LoggedIn {
    pub user_id: Id<UserMarker>,
    pub token: String,
}

/// Confirms the mailed code. The registration session becomes a regular login session.
async fn activate_account(
    ActivateAccountPath(): ActivateAccountPath,
    State(db): State<Arc<DbClient>>,
    session: RegistrationSession,
    Json(form): Json<ActivationForm>,
) -> Result<Json<LoggedIn>> {
    let activation_code = session
        .activation_code()
        .ok_or(ServerError::AlreadyActive)?;

    if !activation_code.matches(form.user_entered_code) {
        return Err(ServerError::InvalidActivationCode);
    }

    let user_id = session.user_id();
    db.activate_user(user_id, session.token_hash()).await?;
    info!(%user_id, "Activated account");

    Ok(Json(LoggedIn {
        user_id,
        token: session.token().as_token_str(),
    }))
}
