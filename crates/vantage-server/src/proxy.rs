//! Forwarding of preview requests to a session's local preview server.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, header};
use axum::response::Response;
use futures::TryStreamExt;

use crate::error::{Result, ServerError};
use crate::session::Session;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "vantage_session";

/// Header alternative to [`SESSION_COOKIE`].
pub const SESSION_HEADER: &str = "x-vantage-session";

/// Connection-level headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Forwards requests verbatim to `127.0.0.1:<port>` and streams the answer back.
///
/// Holds no per-request lock; the preview server handles its own concurrency.
#[derive(Debug, Clone)]
pub struct ProxyRouter {
    client: reqwest::Client,
    max_body_size: usize,
}

impl ProxyRouter {
    pub fn new(max_body_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ServerError::Internal(format!("Failed to build proxy client: {e}")))?;
        Ok(Self {
            client,
            max_body_size,
        })
    }

    /// Route a request to the session's preview server.
    pub async fn route(&self, session: &Session, request: Request) -> Result<Response> {
        let port = session.preview_port()?;
        session.touch();
        self.forward(port, request).await
    }

    /// Forward a request to a local port.
    pub async fn forward(&self, port: u16, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("http://127.0.0.1:{port}{path}");

        let body = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read request body: {e}")))?;

        tracing::trace!(method = %parts.method, %url, "Forwarding preview request");
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(strip_hop_by_hop(parts.headers))
            .body(body)
            .send()
            .await
            .map_err(|e| ServerError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers().clone());
        let stream = upstream.bytes_stream().map_err(std::io::Error::other);

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
    headers
}

/// Session id carried by a request, from the header or the session cookie.
pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value binding a browser to a session.
pub fn session_cookie(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; vantage_session=abc-123; other=1"),
        );
        assert_eq!(session_from_headers(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("vantage_session=cookie"));
        headers.insert(SESSION_HEADER, HeaderValue::from_static("header"));
        assert_eq!(session_from_headers(&headers).as_deref(), Some("header"));
    }

    #[test]
    fn test_no_session() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("vantage_session_old=x"));
        assert_eq!(session_from_headers(&headers), None);
    }

    #[test]
    fn test_hop_by_hop_headers_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));

        let headers = strip_hop_by_hop(headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_cookie_format() {
        assert_eq!(
            session_cookie("abc"),
            "vantage_session=abc; Path=/; HttpOnly; SameSite=Lax"
        );
    }
}
