use std::path::PathBuf;
use tracing_structlog::{configure_logger, fields};

#[derive(Debug, thiserror::Error)]
#[error("quota exceeded for {0}")]
struct QuotaError(String);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // PYTHON_ENV=production switches to JSON lines.
    let log = configure_logger()?;

    log.info("service starting", fields!(version = env!("CARGO_PKG_VERSION")));

    {
        let _guard = log.context(fields!(job_id = "nightly-report"));
        log.info("job started", fields!(path = PathBuf::from("reports/nightly.csv")));
        log.warning("slow query", fields!(elapsed_ms = 1532));
    }

    log.bind(fields!(tenant = "acme"));
    log.exception("job failed", &QuotaError("acme".into()), fields!());
    log.clear();

    // `tracing` and `log` records share the same output.
    tracing::info!(target: "billing", invoices = 12, "invoices sent");
    log::warn!(target: "legacy", "message from the log facade");

    log.named("scheduler").debug("only shown with LOG_LEVEL=debug", fields!());
    Ok(())
}
