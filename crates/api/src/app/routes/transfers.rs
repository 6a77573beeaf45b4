use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use lotsync_core::TransferId;
use lotsync_infra::NewTransfer;

use crate::app::routes::common::{blocking, ensure_actor};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_transfer).get(list_transfers))
        .route("/:id", get(get_transfer))
        .route("/:id/approve", post(approve_transfer))
        .route("/:id/reject", post(reject_transfer))
        .route("/:id/cancel", post(cancel_transfer))
}

fn parse_transfer_id(id: &str) -> Result<TransferId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid transfer id"))
}

pub async fn create_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::CreateTransferRequest>,
) -> axum::response::Response {
    let item_ids = match body.parsed_item_ids() {
        Ok(ids) => ids,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let input = NewTransfer {
        source_team: body.source_team,
        dest_team: body.dest_team,
        item_ids,
        requester_id: actor.user_id(),
        reason: body.reason,
    };

    let result = match blocking(move || services.transfers().create(input)).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match result {
        Ok(request) => (StatusCode::CREATED, Json(dto::TransferStatusResponse::from(&request))).into_response(),
        Err(e) => errors::transfer_error_to_response(e),
    }
}

pub async fn approve_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ApproveTransferRequest>,
) -> axum::response::Response {
    let transfer_id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_actor(&actor, body.approver_id, "approver_id") {
        return resp;
    }

    let approver = body.approver_id;
    match blocking(move || services.transfers().approve(transfer_id, approver)).await {
        Ok(Ok(request)) => Json(dto::TransferStatusResponse::from(&request)).into_response(),
        Ok(Err(e)) => errors::transfer_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn reject_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectTransferRequest>,
) -> axum::response::Response {
    let transfer_id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_actor(&actor, body.approver_id, "approver_id") {
        return resp;
    }

    let dto::RejectTransferRequest { approver_id, reason } = body;
    match blocking(move || services.transfers().reject(transfer_id, approver_id, reason)).await {
        Ok(Ok(request)) => Json(dto::TransferStatusResponse::from(&request)).into_response(),
        Ok(Err(e)) => errors::transfer_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn cancel_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelTransferRequest>,
) -> axum::response::Response {
    let transfer_id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_actor(&actor, body.requester_id, "requester_id") {
        return resp;
    }

    let requester = body.requester_id;
    match blocking(move || services.transfers().cancel(transfer_id, requester)).await {
        Ok(Ok(request)) => Json(dto::TransferStatusResponse::from(&request)).into_response(),
        Ok(Err(e)) => errors::transfer_error_to_response(e),
        Err(resp) => resp,
    }
}

/// Full request; lets a client resolve an approve whose response it never saw.
pub async fn get_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let transfer_id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match blocking(move || services.transfers().get(transfer_id)).await {
        Ok(Ok(request)) => Json(request).into_response(),
        Ok(Err(e)) => errors::transfer_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn list_transfers(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListTransfersQuery>,
) -> axum::response::Response {
    let query = match query.to_query() {
        Ok(q) => q,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match blocking(move || services.transfers().list(&query)).await {
        Ok(Ok(requests)) => Json(requests).into_response(),
        Ok(Err(e)) => errors::transfer_error_to_response(e),
        Err(resp) => resp,
    }
}
