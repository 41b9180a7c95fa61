//! The actual reverse-proxy leg: builds the upstream request, forwards it
//! with `reqwest`, and copies the response back preserving binary integrity.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpStream;

use crate::registry::AppSpec;
use crate::support::errors::ProxyError;

/// True if `127.0.0.1:port` currently accepts a TCP connection.
pub async fn port_accepting(port: u16) -> bool {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    tokio::time::timeout(Duration::from_millis(150), TcpStream::connect(addr))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// Forwards one request to the backend and translates its response back
/// into an axum [`Response`].
pub async fn forward_request(
    client: &reqwest::Client,
    app: &AppSpec,
    method: &Method,
    rest: &str,
    query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let mut url = format!("http://127.0.0.1:{}/{}", app.port, rest);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }

    let reqwest_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);

    let mut request = client.request(reqwest_method, &url);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            request = request.header(name.as_str(), value_str);
        }
    }
    request = request.body(body.to_vec());

    let upstream = request.send().await?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // Body bytes are always passed through untouched, whether the backend
    // declared an image/font/octet-stream/pdf content type or the bytes
    // contain embedded NULs — there's no text re-encoding step here that
    // could mangle a binary payload in the first place.
    let body_bytes = upstream.bytes().await?;

    let mut response_headers = HeaderMap::new();
    if !content_type.is_empty() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(b"content-type"),
            HeaderValue::from_str(&content_type),
        ) {
            response_headers.insert(name, value);
        }
    }

    Ok((status, response_headers, body_bytes).into_response())
}
