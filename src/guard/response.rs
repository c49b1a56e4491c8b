use super::pipeline::Admission;
use super::rejection::Rejection;
use crate::ratelimit::RateLimitDecision;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::Response;
use serde::Serialize;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Serialize `value` as the JSON body of a response with `status`.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<BoxBody> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut resp = Response::new(full_body(body));
            *resp.status_mut() = status;
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            resp
        }
        Err(e) => {
            tracing::error!("guard: response serialization failed, error={}", e);
            let mut resp = Response::new(full_body(r#"{"reason":"INTERNAL_ERROR"}"#));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        }
    }
}

/// `x-ratelimit-*` headers, plus `retry-after` on a deny.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let mut buf = itoa::Buffer::new();
    headers.insert(X_RATELIMIT_LIMIT, header_num(&mut buf, decision.limit as u64));
    headers.insert(X_RATELIMIT_REMAINING, header_num(&mut buf, decision.remaining as u64));
    headers.insert(X_RATELIMIT_RESET, header_num(&mut buf, decision.reset_at_secs()));
    if !decision.allowed {
        headers.insert(RETRY_AFTER, header_num(&mut buf, decision.retry_after_secs));
    }
}

fn header_num(buf: &mut itoa::Buffer, n: u64) -> HeaderValue {
    HeaderValue::from_str(buf.format(n)).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

impl Rejection {
    pub fn to_response(&self) -> Response<BoxBody> {
        let mut resp = json_response(self.status(), self);
        if let Some(decision) = &self.rate_limit {
            apply_rate_limit_headers(resp.headers_mut(), decision);
        } else if let Some(secs) = self.retry_after_secs {
            let mut buf = itoa::Buffer::new();
            resp.headers_mut().insert(RETRY_AFTER, header_num(&mut buf, secs));
        }
        resp
    }
}

impl Admission {
    /// 200 carrying the sanitized request and quota headers.
    pub fn to_response(&self) -> Response<BoxBody> {
        let mut resp = json_response(StatusCode::OK, self);
        apply_rate_limit_headers(resp.headers_mut(), &self.rate_limit);
        resp
    }
}
