//! Process-wide installs can only happen once, so everything touching the
//! global subscriber, the `log` facade and the panic hook lives in one test.

use tracing_structlog::bridge::{install_log_bridge, install_panic_hook};
use tracing_structlog::init::install_global;
use tracing_structlog::logger::MemoryWriter;
use tracing_structlog::{configure_logger_with, InitError, Logger, LoggingConfig};

#[test]
fn global_installs_route_everything_through_the_pipeline() {
    let out = MemoryWriter::new();
    let log = Logger::builder(LoggingConfig::default().with_no_color(true))
        .writer(out.clone())
        .build()
        .unwrap();

    install_global(&log).unwrap();
    install_log_bridge().unwrap();
    install_panic_hook(&log);

    tracing::info!(target: "billing", invoices = 3, "invoices sent");
    log::info!(target: "legacy::worker", "queue drained in {}ms", 12);
    log::info!(target: "reqwest::connect", "connecting to upstream");
    log::warn!(target: "reqwest::connect", "upstream is slow");

    let caught = std::panic::catch_unwind(|| panic!("kaboom"));
    assert!(caught.is_err());

    install_panic_hook(&log);

    let text = out.contents();
    assert!(text.contains("invoices sent"));
    assert!(text.contains("[billing]"));
    assert!(text.contains("invoices=3"));

    assert!(text.contains("queue drained in 12ms"));
    assert!(text.contains("[legacy::worker]"));
    assert!(!text.contains("log.target"));

    assert!(!text.contains("connecting to upstream"));
    assert!(text.contains("upstream is slow"));

    assert!(text.contains("[critical] uncaught panic"));
    assert!(text.contains("panic: kaboom"));
    assert!(text.contains("panic hook has been overridden"));

    let again = configure_logger_with(LoggingConfig::default());
    assert!(matches!(again, Err(InitError::SubscriberAlreadySet(_))));
}
