use axum::{
    Router,
    extract::{
        DefaultBodyLimit, FromRef, Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use json::Json;
use mail::{MailError, Mailer};
use media::{MediaError, MediaStore};
use serde::Serialize;
use snapgram_common::{
    media::NormalizeError,
    model::{
        Id, ModelValidationError,
        auth::{AuthTokenDecodeError, AuthTokenHashError, PasswordHashError},
        password::PasswordError,
        post::PostMarker,
        user::UserMarker,
    },
    util::PositiveDuration,
};
use snapgram_db::client::{DbClient, DbError};
use std::sync::Arc;
use thiserror::Error;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

mod auth;
mod form;
mod json;
pub mod mail;
pub mod media;
mod routes;

pub type ServerRouter = Router<ServerState>;

/// How long a fresh session authenticates.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct SessionLifetime(pub PositiveDuration);

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
    pub mailer: Arc<Mailer>,
    pub media_store: Arc<MediaStore>,
    pub session_lifetime: SessionLifetime,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

/// The complete application: API routes, `/media/` files, body limit and request tracing.
pub fn app(state: ServerState, max_request_bytes: usize) -> Router {
    let media = ServeDir::new(state.media_store.root());

    routes()
        .nest_service("/media", media)
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("Incoming form rejected: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Reading the form failed: {0}")]
    Multipart(#[from] MultipartError),
    #[error("The form field {0:?} is required.")]
    MissingField(&'static str),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error("The account has not been activated yet.")]
    PendingActivation,
    #[error("The account is already active.")]
    AlreadyActive,
    #[error("Invalid activation code. Please try again.")]
    InvalidActivationCode,
    #[error("Invalid login credentials.")]
    InvalidCredentials,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    PasswordHash(#[from] PasswordHashError),
    #[error(transparent)]
    Validation(#[from] ModelValidationError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("Sending mail failed: {0}")]
    Mail(#[from] MailError),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
    #[error("Post {0} belongs to another user.")]
    NotPostOwner(Id<PostMarker>),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::UserByIdNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidAuthorizationHeader(rejection) if rejection.is_missing() => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::InvalidToken
            | ServerError::PendingActivation
            | ServerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ServerError::JsonRejection(JsonRejection::JsonDataError(_)) => StatusCode::BAD_REQUEST,
            ServerError::JsonRejection(rejection) => rejection.status(),
            ServerError::MultipartRejection(rejection) => rejection.status(),
            ServerError::Multipart(err) => err.status(),
            ServerError::MissingField(_)
            | ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_)
            | ServerError::InvalidActivationCode
            | ServerError::Password(_)
            | ServerError::Validation(_)
            | ServerError::Media(MediaError::Normalize(NormalizeError::Decode { .. })) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::NotPostOwner(_) => StatusCode::FORBIDDEN,
            ServerError::AlreadyActive | ServerError::Database(DbError::HandleTaken(_)) => {
                StatusCode::CONFLICT
            }
            ServerError::JsonResponse(_)
            | ServerError::AuthTokenHash(_)
            | ServerError::PasswordHash(_)
            | ServerError::Database(_)
            | ServerError::Media(_)
            | ServerError::Mail(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
struct ErrorResponse {
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = if status.is_client_error() {
            info!(error = %self, %status, "Rejecting request");
            Some(self.to_string())
        } else {
            error!(error = %self, %status, "Replying with error");
            None
        };

        let error_response = ErrorResponse {
            status: status.as_u16(),
            message,
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::server::{
        ServerError, ServerState, SessionLifetime, app,
        form::test_request::multipart_request,
        mail::{MailConfig, Mailer},
        media::MediaStore,
    };
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use snapgram_common::{
        media::ImageNormalizer,
        model::{
            Id,
            activation::ActivationCode,
            auth::{AuthToken, Session, StoredPassword},
            password::PasswordError,
            user::{CreateUser, EmailAddress, UserHandle, UserMarker},
        },
        snowflake::{ProcessId, WorkerId},
        util::PositiveDuration,
    };
    use snapgram_db::client::{DbClient, DbError};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tempfile::TempDir;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    const SENDER: &str = "Snapgram <noreply@snapgram.test>";

    fn log_only() -> Mailer {
        Mailer::log_only(SENDER.parse().unwrap())
    }

    fn app_with(db_client: Arc<DbClient>, mailer: Mailer) -> (Router, TempDir) {
        let media_root = tempfile::tempdir().unwrap();

        let state = ServerState {
            db_client,
            mailer: Arc::new(mailer),
            media_store: Arc::new(MediaStore::new(
                media_root.path().to_owned(),
                ImageNormalizer::default(),
            )),
            session_lifetime: SessionLifetime(PositiveDuration::from_seconds(60).unwrap()),
        };

        (app(state, 1024 * 1024), media_root)
    }

    /// The pool never connects; every request below is answered before touching it.
    fn test_app() -> (Router, TempDir) {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://snapgram@localhost/snapgram")
            .unwrap();
        let db_client = Arc::new(DbClient::new(pool, WorkerId::MIN, ProcessId::MIN));

        app_with(db_client, log_only())
    }

    /// Connects to the Postgres database in `DATABASE_URL`.
    async fn database() -> Arc<DbClient> {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL is set");
        let pool = PgPoolOptions::new().connect(&url).await.unwrap();

        let db_client = DbClient::new(pool, WorkerId::MIN, ProcessId::MIN);
        db_client.migrate().await.unwrap();
        Arc::new(db_client)
    }

    async fn respond(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, body)
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let (app, _media_root) = test_app();
        respond(&app, request).await
    }

    fn authorized(mut request: Request<Body>, token: &AuthToken) -> Request<Body> {
        let value = format!("Bearer {}", token.as_token_str());
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, value.parse().unwrap());
        request
    }

    /// Stores a user waiting for the activation code 4821.
    async fn register_pending(db_client: &DbClient) -> (Id<UserMarker>, AuthToken, Session) {
        let user_id = db_client.generate_id();
        let token = AuthToken::generate_random(user_id);
        let session = Session {
            user: user_id,
            token_hash: token.hash().unwrap(),
            created_at: OffsetDateTime::now_utc(),
            expires_after: PositiveDuration::from_seconds(3600),
            activation_code: ActivationCode::new(4821),
        };
        let user = CreateUser {
            handle: UserHandle::new(format!("apiuser{user_id}")).unwrap(),
            email: EmailAddress::new("apiuser@snapgram.test".to_owned()).unwrap(),
            first_name: None,
            last_name: None,
            password: StoredPassword::hash("Testpassword_123").unwrap(),
        };

        db_client
            .register_user(user_id, &user, &session)
            .await
            .unwrap();
        (user_id, token, session)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ServerError::Password(PasswordError::Mismatch).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Database(DbError::HandleTaken("taken".to_owned())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::NotPostOwner(Id::from(1)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServerError::InvalidCredentials.to_string(),
            "Invalid login credentials."
        );
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, body) = send(Request::get("/nowhere/").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let (status, body) = send(Request::get("/user/").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], 401);
    }

    #[tokio::test]
    async fn malformed_token_is_bad_request() {
        let request = Request::get("/user/")
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_reaction_is_not_found() {
        let request = Request::post("/user/toggle_like/1/love/")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_subscription_action_is_not_found() {
        let request = Request::post("/user/user_profile/1/subscribe_toggle/follow/")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn weak_registration_password_is_rejected() {
        let form = json!({
            "username": "newuser",
            "email": "newuser@snapgram.test",
            "first_name": "New",
            "last_name": "User",
            "password1": "newuser",
            "password2": "newuser",
        });

        let (status, body) = send(post_json("/registration/", &form)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "This password is too short. It must contain at least 8 characters., \
            This password is too common."
        );
    }

    #[tokio::test]
    async fn mismatched_registration_passwords_are_rejected() {
        let form = json!({
            "username": "newuser",
            "email": "newuser@snapgram.test",
            "password1": "Testpassword_123",
            "password2": "Testpassword_124",
        });

        let (status, body) = send(post_json("/registration/", &form)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "The passwords are not the same.");
    }

    #[tokio::test]
    async fn invalid_username_is_rejected() {
        let form = json!({
            "username": "new user!",
            "email": "newuser@snapgram.test",
            "password1": "Testpassword_123",
            "password2": "Testpassword_123",
        });

        let (status, _) = send(post_json("/registration/", &form)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    fn login_request(body: &'static str) -> Request<Body> {
        Request::post("/login/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn unparsable_login_is_bad_request() {
        let (status, body) = send(login_request("{\"username\": \"newuser\"")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn mistyped_login_is_bad_request() {
        let (status, body) = send(login_request("{\"username\": 5")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);

        let (status, _) = send(login_request("{\"username\": \"newuser\"}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn home_page_needs_no_session() {
        let (status, body) = send(Request::get("/").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["registration"], "/registration/");
    }

    #[tokio::test]
    async fn logout_lives_under_user() {
        let request = Request::post("/user/logout/").body(Body::empty()).unwrap();

        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database"]
    async fn wrong_activation_code_keeps_the_account_pending() {
        let db_client = database().await;
        let (app, _media_root) = app_with(db_client.clone(), log_only());
        let (user_id, token, session) = register_pending(&db_client).await;

        let wrong = post_json(
            "/registration/activate_account/",
            &json!({ "user_entered_code": 4820 }),
        );
        let (status, body) = respond(&app, authorized(wrong, &token)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid activation code. Please try again.");
        let stored = db_client
            .fetch_session(&session.token_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_pending_activation());

        let right = post_json(
            "/registration/activate_account/",
            &json!({ "user_entered_code": 4821 }),
        );
        let (status, body) = respond(&app, authorized(right, &token)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token"], token.as_token_str());
        let handle = format!("apiuser{user_id}");
        let account = db_client
            .fetch_account_by_handle(&handle)
            .await
            .unwrap()
            .unwrap();
        assert!(account.is_active);
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database"]
    async fn undeliverable_activation_mail_stores_nothing() {
        let db_client = database().await;
        let mailer = Mailer::new(&MailConfig {
            smtp_host: "localhost".to_owned(),
            smtp_port: 1,
            smtp_from: SENDER.to_owned(),
            ..MailConfig::default()
        })
        .unwrap();
        let (app, _media_root) = app_with(db_client.clone(), mailer);

        let handle = format!("undelivered{}", db_client.generate_id::<UserMarker>());
        let form = json!({
            "username": handle,
            "email": "undelivered@snapgram.test",
            "password1": "Testpassword_123",
            "password2": "Testpassword_123",
        });
        let (status, _) = respond(&app, post_json("/registration/", &form)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let handle = UserHandle::new(handle).unwrap();
        assert!(!db_client.handle_exists(&handle).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database"]
    async fn post_without_caption() {
        let db_client = database().await;
        let (app, _media_root) = app_with(db_client.clone(), log_only());
        let (user_id, token, session) = register_pending(&db_client).await;
        db_client
            .activate_user(user_id, &session.token_hash)
            .await
            .unwrap();

        let mut request = multipart_request(&[("image", Some("beach.jpg"), "pixels")]);
        *request.uri_mut() = "/user/create_post/".parse().unwrap();
        let (status, body) = respond(&app, authorized(request, &token)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["caption"], "");
        assert_eq!(body["tags"], json!([]));
        assert_eq!(body["images"].as_array().unwrap().len(), 1);
    }
}
