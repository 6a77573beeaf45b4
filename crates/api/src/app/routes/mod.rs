use axum::{routing::get, Router};

pub mod common;
pub mod stats;
pub mod subscribe;
pub mod system;
pub mod transfers;

/// Router for all endpoints that require an acting user.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/status", get(system::status))
        .nest("/transfers", transfers::router())
        .nest("/teams", stats::router())
        .nest("/subscribe", subscribe::router())
}
