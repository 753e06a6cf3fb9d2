use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller id forwarded by the gateway; only recorded on the span here.
const CALLER_HEADER: &str = "x-user-id";

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Propagates the gateway's request id, or mints one, and echoes it back.
/// Every log line of the request carries the id and the caller.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = header_str(&request, REQUEST_ID_HEADER)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let caller = header_str(&request, CALLER_HEADER)
        .unwrap_or("anonymous")
        .to_string();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        caller = %caller,
        method = %request.method(),
        path = %request.uri().path()
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
