use crate::server::ServerError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use snapgram_common::model::{
    Id,
    activation::ActivationCode,
    auth::{AuthToken, AuthTokenHash, Session},
    user::UserMarker,
};
use snapgram_db::client::DbClient;
use std::sync::Arc;
use time::OffsetDateTime;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// Resolves the bearer token of a request to its live session.
async fn session_from_parts<S>(parts: &mut Parts, state: &S) -> Result<(AuthToken, Session), ServerError>
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    let request_token: AuthToken = AuthorizationHeader::from_request_parts(parts, state)
        .await
        .map_err(ServerError::InvalidAuthorizationHeader)?
        .token()
        .parse()?;

    let token_hash = request_token.hash()?;

    let session = Arc::<DbClient>::from_ref(state)
        .fetch_session(&token_hash)
        .await?
        .ok_or(ServerError::InvalidToken)?;

    if session.user != request_token.user_id || session.is_expired_at(OffsetDateTime::now_utc())
    {
        return Err(ServerError::InvalidToken);
    }

    Ok((request_token, session))
}

/// Caller holding an activated login session.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser {
    id: Id<UserMarker>,
    token_hash: AuthTokenHash,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(&self) -> Id<UserMarker> {
        self.id
    }

    #[must_use]
    pub fn token_hash(&self) -> &AuthTokenHash {
        &self.token_hash
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let (_, session) = session_from_parts(parts, state).await?;

        if session.is_pending_activation() {
            return Err(ServerError::PendingActivation);
        }

        Ok(Self {
            id: session.user,
            token_hash: session.token_hash,
        })
    }
}

/// Caller holding any live session, including one created by registration that still
/// waits for its activation code.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct RegistrationSession {
    token: AuthToken,
    session: Session,
}

impl RegistrationSession {
    #[must_use]
    pub fn user_id(&self) -> Id<UserMarker> {
        self.session.user
    }

    #[must_use]
    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    #[must_use]
    pub fn token_hash(&self) -> &AuthTokenHash {
        &self.session.token_hash
    }

    /// `None` once the account was activated through this session.
    #[must_use]
    pub fn activation_code(&self) -> Option<ActivationCode> {
        self.session.activation_code
    }
}

impl<S> FromRequestParts<S> for RegistrationSession
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let (token, session) = session_from_parts(parts, state).await?;

        Ok(Self { token, session })
    }
}
