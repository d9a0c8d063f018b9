use std::sync::Arc;

use async_trait::async_trait;
use tracing_structlog::entity::{CachedAttributes, LoggableEntity};
use tracing_structlog::error::EntityError;
use tracing_structlog::failure::{FailureReporter, FailureSink, ProcessorFailure};
use tracing_structlog::{fields, FieldValue, Logger, LoggingConfig};

/// Example of shipping processor failures to a custom error tracker by
/// implementing [`FailureSink`]. Here we only print them.
struct PrintingTracker;

#[async_trait]
impl FailureSink for PrintingTracker {
    async fn send(&self, failure: &ProcessorFailure) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        println!("[tracker] {}", serde_json::to_string(failure)?);
        Ok(())
    }
}

/// An entity whose attribute snapshot expired after its unit of work ended.
struct Invoice {
    attributes: CachedAttributes,
}

impl LoggableEntity for Invoice {
    fn entity_name(&self) -> &str {
        "Invoice"
    }

    fn detached_id(&self) -> Result<Option<String>, EntityError> {
        self.attributes.get_fresh("id")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (reporter, handle) = FailureReporter::spawn(Arc::new(PrintingTracker), 64);
    let log = Logger::builder(LoggingConfig::from_env())
        .failure_reporter(reporter)
        .build()?;

    let fresh = Invoice {
        attributes: CachedAttributes::with([("id", "inv_1")]),
    };
    log.info("invoice paid", fields!(invoice = FieldValue::entity(fresh)));

    let stale = Invoice {
        attributes: CachedAttributes::new(),
    };
    stale.attributes.expire();
    // Logged without the invoice field; the failure goes to the tracker.
    log.info("invoice archived", fields!(invoice = FieldValue::entity(stale)));

    // The reporter task stops once every logger clone is gone.
    drop(log);
    handle.await?;
    Ok(())
}
