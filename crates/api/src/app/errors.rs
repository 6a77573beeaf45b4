use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use lotsync_core::DomainError;
use lotsync_infra::{StatsError, TransferError};

pub fn transfer_error_to_response(err: TransferError) -> axum::response::Response {
    let (status, code) = match &err {
        TransferError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        TransferError::ReservationConflict { .. } => (StatusCode::CONFLICT, "reservation_conflict"),
        TransferError::OwnershipConflict { .. } => (StatusCode::CONFLICT, "ownership_conflict"),
        TransferError::ReservationLost { .. } => (StatusCode::CONFLICT, "reservation_lost"),
        TransferError::AlreadyDecided { .. } => (StatusCode::CONFLICT, "already_decided"),
        TransferError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        TransferError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        TransferError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
        TransferError::InvariantViolation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation"),
        TransferError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
    };
    json_error(status, code, err.to_string())
}

pub fn stats_error_to_response(err: StatsError) -> axum::response::Response {
    match err {
        StatsError::Validation(e) => domain_error_to_response(e),
        StatsError::Store(e) => json_error(StatusCode::SERVICE_UNAVAILABLE, "stats_unavailable", e.to_string()),
    }
}

/// Input errors raised while mapping requests onto domain types.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DomainError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        other => json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", other.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use lotsync_core::TransferId;
    use lotsync_infra::StoreError;
    use lotsync_inventory::{ItemId, TransferStatus};

    use super::*;

    fn status_of(err: TransferError) -> StatusCode {
        transfer_error_to_response(err).status()
    }

    #[test]
    fn transfer_errors_map_to_http_statuses() {
        let item = ItemId::parse("s1").unwrap();
        assert_eq!(status_of(TransferError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(TransferError::ReservationConflict {
                item: item.clone(),
                holder: TransferId::new()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(TransferError::ReservationLost { item }), StatusCode::CONFLICT);
        assert_eq!(
            status_of(TransferError::AlreadyDecided {
                id: TransferId::new(),
                status: TransferStatus::Rejected
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(TransferError::NotFound("t".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(TransferError::Forbidden("no".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(TransferError::ServiceUnavailable("lock timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn stats_store_failure_is_unavailable() {
        let res = stats_error_to_response(StatsError::Store(StoreError::Unavailable("down".into())));
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let res = stats_error_to_response(StatsError::Validation(DomainError::validation("bad range")));
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
