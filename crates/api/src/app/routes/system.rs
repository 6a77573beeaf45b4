use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use lotsync_events::EntityType;

use crate::app::services::AppServices;
use crate::context::ActorContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(actor): Extension<ActorContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": actor.user_id().to_string(),
    }))
}

/// Hub sequence heads and stats cache counters.
pub async fn status(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let hub = services.hub();
    let sequences: serde_json::Map<String, serde_json::Value> = EntityType::ALL
        .into_iter()
        .map(|t| (t.as_str().to_string(), hub.last_sequence(t).into()))
        .collect();
    let cache = services.stats().metrics();

    Json(serde_json::json!({
        "instance_id": hub.instance_id(),
        "sequences": sequences,
        "stats_cache": {
            "hits": cache.hits,
            "misses": cache.misses,
            "invalidations": cache.invalidations,
            "stale_discards": cache.stale_discards,
            "entries": cache.entries,
            "hit_rate": cache.hit_rate(),
        },
    }))
}
