use crate::server::ServerRouter;
use axum::Router;

mod home;
mod login;
mod posts;
mod profiles;
mod registration;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(home::routes())
        .merge(registration::routes())
        .merge(login::routes())
        .merge(profiles::routes())
        .merge(posts::routes())
}
