use crate::identity::Identity;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Uri};
use std::net::SocketAddr;

/// Everything the guard needs from one inbound request.
#[derive(Debug, Clone)]
pub struct GuardRequest {
    pub method: Method,
    pub path: String,
    /// Raw query string, still percent-encoded.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer: Option<SocketAddr>,
    /// Identity already verified by the authentication layer.
    pub identity: Option<Identity>,
}

impl GuardRequest {
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_owned),
            headers,
            body,
            peer: None,
            identity: None,
        }
    }

    /// Bodiless request for `path_and_query`, e.g. `/api/products?q=shoes`.
    pub fn get(path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path_and_query, None),
        };
        Self {
            method: Method::GET,
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer: None,
            identity: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = HeaderValue::from_str(value) {
            self.headers.insert(name, v);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path_and_query() {
        let req = GuardRequest::get("/api/products?q=shoes&page=2");
        assert_eq!(req.path, "/api/products");
        assert_eq!(req.query.as_deref(), Some("q=shoes&page=2"));

        let req = GuardRequest::get("/api/cart");
        assert!(req.query.is_none());
    }

    #[test]
    fn test_from_uri() {
        let uri: Uri = "http://gw.local/api/orders/7?expand=items".parse().unwrap();
        let req = GuardRequest::new(Method::POST, &uri, HeaderMap::new(), Bytes::from_static(b"{}"));
        assert_eq!(req.path, "/api/orders/7");
        assert_eq!(req.query.as_deref(), Some("expand=items"));
        assert_eq!(req.method, Method::POST);
    }
}
