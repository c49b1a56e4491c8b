use super::AppState;
use crate::guard::{BoxBody, GuardRequest, RejectReason, Rejection};
use bytes::Bytes;
use http::request::Parts;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use tracing::debug;

/// Answer one request with its admission decision.
///
/// The body is buffered up to the sanitization limit plus one byte, so an
/// oversized body is still classified by the pipeline while an unbounded
/// stream is cut off early.
pub async fn handle_request(
    req: Request<Incoming>,
    state: AppState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let limit = state.config.sanitization.max_body_bytes;

    let body = match Limited::new(body, limit.saturating_add(1)).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            debug!(
                "server: body over limit, path={}, limit={}, peer={}",
                parts.uri.path(),
                limit,
                peer_addr
            );
            let now = state.pipeline.now_ms();
            return Ok(Rejection::payload_too_large(parts.uri.path(), now, limit).to_response());
        }
        Err(e) => {
            debug!("server: body read failed, peer={}, error={}", peer_addr, e);
            let now = state.pipeline.now_ms();
            let rejection = Rejection::new(
                RejectReason::ValidationError,
                "request body could not be read",
                parts.uri.path(),
                now,
            );
            return Ok(rejection.to_response());
        }
    };

    Ok(admit(&state, parts, body, peer_addr).await)
}

/// Evaluate an already-buffered request.
pub async fn admit(state: &AppState, parts: Parts, body: Bytes, peer_addr: SocketAddr) -> Response<BoxBody> {
    let identity = state.pipeline.resolver().identity_from_headers(&parts.headers);
    let mut req = GuardRequest::new(parts.method, &parts.uri, parts.headers, body).with_peer(peer_addr);
    req.identity = identity;

    match state.pipeline.evaluate(&req).await {
        Ok(admission) => admission.to_response(),
        Err(rejection) => rejection.to_response(),
    }
}
