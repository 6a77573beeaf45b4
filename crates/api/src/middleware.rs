use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use lotsync_core::UserId;

use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Require an `x-actor-id` header and expose it as [`ActorContext`].
///
/// Missing header is 401, a malformed one 400.
pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let actor = extract_actor(req.headers())?;
    req.extensions_mut().insert(ActorContext::new(actor));
    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Result<UserId, StatusCode> {
    let header = headers.get(ACTOR_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;
    let raw = header.to_str().map_err(|_| StatusCode::BAD_REQUEST)?.trim();
    if raw.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    raw.parse::<UserId>().map_err(|_| StatusCode::BAD_REQUEST)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn actor_header_is_required_and_must_be_a_uuid() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_actor(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("   "));
        assert_eq!(extract_actor(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(extract_actor(&headers), Err(StatusCode::BAD_REQUEST));

        let user = UserId::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_str(&user.to_string()).unwrap());
        assert_eq!(extract_actor(&headers), Ok(user));
    }
}
