//! Access log with request timing for axum services.

use crate::fields;
use crate::logger::Logger;
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::time::Instant;

/// Name of the logger access lines are reported under.
pub const ACCESS_LOGGER: &str = "access_log";

/// Log one line per request once the response is ready:
/// `"{status} {method} {path?query}"` with the timing in milliseconds.
///
/// Add it inside [`request_context_middleware`](crate::request::request_context_middleware)
/// so access lines carry the request id.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/users/{id}", get(show_user))
///     .layer(axum::middleware::from_fn_with_state(log.clone(), access_log_middleware))
///     .layer(axum::middleware::from_fn(request_context_middleware));
/// ```
pub async fn access_log_middleware(
    State(logger): State<Logger>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();
    let target = path_with_query(request.uri());
    let client_ip = client_addr(&request);
    let route = route_name(&request);

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let status = response.status().as_u16();
    logger.named(ACCESS_LOGGER).info(
        format!("{} {} {}", status, method, target),
        fields!(
            time = elapsed_ms.round() as u64,
            status = status,
            method = method,
            path = path,
            query = query,
            client_ip = client_ip,
            route = route,
        ),
    );

    response
}

/// Path followed by `?query` when a query string is present.
pub fn path_with_query(uri: &Uri) -> String {
    match uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", uri.path(), query),
        _ => uri.path().to_string(),
    }
}

/// `ip:port` of the peer, or an empty string when the server was not
/// started with connect info.
pub fn client_addr(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default()
}

/// The matched route template, falling back to the raw path.
pub fn route_name(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}
