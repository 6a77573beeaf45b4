use axum::http::StatusCode;
use tracing::error;

use lotsync_core::UserId;

use crate::app::errors;
use crate::context::ActorContext;

/// Run a synchronous service call off the async executor.
pub async fn blocking<T, F>(f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!(error = %e, "blocking service call failed");
        errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "service call aborted")
    })
}

/// Body-supplied user ids must name the caller.
pub fn ensure_actor(actor: &ActorContext, claimed: UserId, field: &'static str) -> Result<(), axum::response::Response> {
    if actor.user_id() == claimed {
        Ok(())
    } else {
        Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            format!("{field} does not match the acting user"),
        ))
    }
}
