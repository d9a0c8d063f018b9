use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::Router;
use tracing_structlog::access_log::access_log_middleware;
use tracing_structlog::request::{self, request_context_middleware};
use tracing_structlog::{configure_logger, fields, Logger};

async fn show_user(State(log): State<Logger>, Path(id): Path<u32>) -> String {
    request::insert("user_id", id);
    log.info("loading user", fields!());
    format!("user {}", id)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log = configure_logger()?;

    let app = Router::new()
        .route("/users/{id}", get(show_user))
        .layer(from_fn_with_state(log.clone(), access_log_middleware))
        .layer(from_fn(request_context_middleware))
        .with_state(log.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    log.info("listening", fields!(addr = addr.to_string()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
