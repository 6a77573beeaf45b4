use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use lotsync_core::TeamId;

use crate::app::routes::common::blocking;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/:id/stats", get(team_stats))
}

/// GET /teams/:id/stats
///
/// Served from the stats cache; a failed recompute is a 503, never stale data.
pub async fn team_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::StatsQuery>,
) -> axum::response::Response {
    let team_id: TeamId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid team id"),
    };
    let (range, filter) = match query.range().and_then(|r| Ok((r, query.filter()?))) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match blocking(move || services.stats().get_team_stats(team_id, range, &filter)).await {
        Ok(Ok(stats)) => Json(&*stats).into_response(),
        Ok(Err(e)) => errors::stats_error_to_response(e),
        Err(resp) => resp,
    }
}
