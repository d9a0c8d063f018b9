//! Request-scoped context, populated by HTTP middleware at the start of
//! each request and merged into every event logged while it is handled.

use crate::context::ContextMap;
use crate::record::FieldValue;
use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static REQUEST_CONTEXT: RefCell<ContextMap>;
}

/// Header used to propagate request identifiers.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Whether a request scope is active for the current task.
pub fn exists() -> bool {
    REQUEST_CONTEXT.try_with(|_| ()).is_ok()
}

/// Add a field to the active request. Returns `false` outside a request.
pub fn insert(key: impl Into<String>, value: impl Into<FieldValue>) -> bool {
    REQUEST_CONTEXT
        .try_with(|data| {
            data.borrow_mut().insert(key.into(), value.into());
        })
        .is_ok()
}

/// Copy of the active request's fields, `None` outside a request.
pub fn data() -> Option<ContextMap> {
    REQUEST_CONTEXT.try_with(|data| data.borrow().clone()).ok()
}

/// Run `future` as one request with `initial` fields.
pub async fn scope<F: Future>(initial: ContextMap, future: F) -> F::Output {
    REQUEST_CONTEXT.scope(RefCell::new(initial), future).await
}

#[cfg(feature = "axum")]
mod middleware {
    use super::{scope, REQUEST_ID_HEADER};
    use crate::context::ContextMap;
    use crate::record::FieldValue;
    use axum::extract::Request;
    use axum::http::HeaderValue;
    use axum::middleware::Next;
    use axum::response::Response;
    use uuid::Uuid;

    /// Open a request scope seeded with `request_id`, taken from the
    /// `x-request-id` header or freshly generated, and echo it back on the
    /// response.
    ///
    /// ```rust,ignore
    /// let app = Router::new()
    ///     .route("/", get(handler))
    ///     .layer(axum::middleware::from_fn(request_context_middleware));
    /// ```
    pub async fn request_context_middleware(request: Request, next: Next) -> Response {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut initial = ContextMap::new();
        initial.insert("request_id".to_string(), FieldValue::from(request_id.as_str()));

        let mut response = scope(initial, next.run(request)).await;
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

#[cfg(feature = "axum")]
pub use middleware::request_context_middleware;
