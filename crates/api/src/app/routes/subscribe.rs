//! Realtime mutation stream.
//!
//! Bridges a hub subscription to Server-Sent Events so dashboards can keep a
//! live replica of one entity type.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::{Duration, Instant};

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Router,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error};

use lotsync_events::{EntityType, MutationEvent, Subscription};

use crate::app::errors;
use crate::app::services::AppServices;

const HEARTBEAT: Duration = Duration::from_secs(15);
const POLL: Duration = Duration::from_millis(1000);

type SseSender = UnboundedSender<Result<SseEvent, Infallible>>;

pub fn router() -> Router {
    Router::new().route("/:entity_type", get(subscribe))
}

/// GET /subscribe/:entity_type
///
/// One `mutation` event per committed change, in hub sequence order:
/// - op (INSERT / UPDATE / DELETE)
/// - entity_id
/// - row, and old_row for updates
/// - sequence (per entity type; consumers dedupe on it)
pub async fn subscribe(
    Extension(services): Extension<Arc<AppServices>>,
    Path(entity_type): Path<String>,
) -> axum::response::Response {
    let Some(entity_type) = EntityType::parse(&entity_type) else {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "unknown_entity_type",
            format!("no realtime stream for {entity_type}"),
        );
    };

    // Subscribe before responding so nothing committed after this point is missed.
    let subscription = services.hub().subscribe_stream(entity_type);
    let (tx, rx) = unbounded_channel();

    if let Err(err) = bridge(entity_type, subscription, tx) {
        error!(entity_type = %entity_type, error = %err, "failed to start realtime stream");
        return errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            "realtime stream unavailable",
        );
    }

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT))
        .into_response()
}

/// Forward hub events to one SSE client on a thread of its own.
///
/// Stream bridges live as long as their connections, so they stay off the
/// runtime's blocking pool, which store calls need. The thread exits once the
/// client is gone.
fn bridge(
    entity_type: EntityType,
    subscription: Subscription<MutationEvent>,
    tx: SseSender,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("sse-{entity_type}"))
        .spawn(move || {
            forward(&subscription, &tx);
            // Dropping the subscription detaches it from the hub.
            debug!(entity_type = %entity_type, "realtime stream closed");
        })
}

fn forward(subscription: &Subscription<MutationEvent>, tx: &SseSender) {
    let mut last_sent = Instant::now();
    loop {
        match subscription.recv_timeout(POLL) {
            Ok(event) => {
                let Ok(data) = serde_json::to_string(&payload(&event)) else {
                    continue;
                };
                let sse_event = SseEvent::default()
                    .event("mutation")
                    .id(event.sequence().to_string())
                    .data(data);
                if tx.send(Ok(sse_event)).is_err() {
                    return;
                }
                last_sent = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                if tx.is_closed() {
                    return;
                }
                if last_sent.elapsed() > HEARTBEAT {
                    let heartbeat = SseEvent::default().event("heartbeat").data("{}");
                    if tx.send(Ok(heartbeat)).is_err() {
                        return;
                    }
                    last_sent = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn payload(event: &MutationEvent) -> serde_json::Value {
    serde_json::json!({
        "entity_type": event.entity_type(),
        "op": event.op(),
        "entity_id": event.entity_id(),
        "row": event.row(),
        "old_row": event.old_row(),
        "sequence": event.sequence(),
        "origin": event.origin(),
        "occurred_at": event.occurred_at(),
    })
}
