use super::AppState;
use crate::guard::{full_body, json_response, BoxBody};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use hyper::body::Incoming;
use hyper::{Request, Response};

const DEFAULT_VIOLATION_LIMIT: usize = 100;

pub fn handle_admin(req: Request<Incoming>, state: AppState) -> Result<Response<BoxBody>, hyper::Error> {
    Ok(route(req.uri().path(), req.uri().query(), &state))
}

fn route(path: &str, query: Option<&str>, state: &AppState) -> Response<BoxBody> {
    match path {
        "/health" | "/healthz" => json_response(StatusCode::OK, &serde_json::json!({"status": "ok"})),

        "/ready" | "/readyz" => {
            let status = if state.is_ready() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_response(
                status,
                &serde_json::json!({
                    "status": if state.is_ready() { "ready" } else { "starting" },
                    "buckets": state.store.len(),
                    "tracked_origins": state.pipeline.tracker().len(),
                }),
            )
        }

        "/metrics" => {
            let mut resp = Response::new(full_body(state.metrics.render()));
            resp.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            resp
        }

        "/breakers" => json_response(StatusCode::OK, &state.pipeline.breakers().snapshot()),

        "/violations" => {
            let limit = query
                .and_then(|q| {
                    q.split('&')
                        .find_map(|kv| kv.strip_prefix("limit="))
                        .and_then(|v| v.parse::<usize>().ok())
                })
                .unwrap_or(DEFAULT_VIOLATION_LIMIT);
            json_response(StatusCode::OK, &state.pipeline.tracker().snapshot(limit))
        }

        _ => json_response(StatusCode::NOT_FOUND, &serde_json::json!({"error": "not found"})),
    }
}
