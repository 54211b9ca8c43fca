use crate::server::{ServerError, ServerRouter, json::Json};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(home)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/", rejection(ServerError))]
struct HomePath();

/// Entry points for a client that has no session yet.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct Home {
    name: &'static str,
    registration: &'static str,
    login: &'static str,
}

async fn home(HomePath(): HomePath) -> Json<Home> {
    Json(Home {
        name: "Snapgram",
        registration: "/registration/",
        login: "/login/",
    })
}
