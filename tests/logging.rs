use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_structlog::entity::{CachedAttributes, LoggableEntity, LoggableId};
use tracing_structlog::error::EntityError;
use tracing_structlog::failure::FailureReporter;
use tracing_structlog::logger::MemoryWriter;
use tracing_structlog::{fields, Environment, FieldValue, Level, Logger, LoggingConfig};

fn capture_logs() -> (Logger, MemoryWriter) {
    capture(LoggingConfig::for_environment(Environment::Development))
}

fn capture_prod_logs() -> (Logger, MemoryWriter) {
    capture(LoggingConfig::for_environment(Environment::Production))
}

fn capture(config: LoggingConfig) -> (Logger, MemoryWriter) {
    let out = MemoryWriter::new();
    let log = Logger::builder(config.with_no_color(true))
        .writer(out.clone())
        .build()
        .unwrap();
    (log, out)
}

fn after<'a>(output: &'a str, marker: &str) -> &'a str {
    output.split(marker).nth(1).unwrap()
}

#[derive(Debug)]
struct ValueError(&'static str);

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for ValueError {}

struct Account {
    attributes: CachedAttributes,
}

impl LoggableEntity for Account {
    fn entity_name(&self) -> &str {
        "Account"
    }

    fn detached_id(&self) -> Result<Option<String>, EntityError> {
        self.attributes.get_fresh("id")
    }
}

struct AccountId(u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acct_{:06}", self.0)
    }
}

impl LoggableId for AccountId {}

struct UnprintableId;

impl fmt::Display for UnprintableId {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Err(fmt::Error)
    }
}

impl LoggableId for UnprintableId {}

#[test]
fn basic_logging() {
    let (log, output) = capture_logs();
    log.info("Test message", fields!(test_key = "test_value"));

    let text = output.contents();
    assert!(text.contains("Test message"));
    assert!(text.contains("test_key=test_value"));
}

#[test]
fn context_guard_binds_and_clears() {
    let (log, output) = capture_logs();

    {
        let _guard = log.context(fields!(request_id = "abc123"));
        log.info("Within context", fields!());
    }
    log.info("Outside context", fields!());

    let text = output.contents();
    assert!(text.contains("Within context"));
    assert!(text.contains("request_id=abc123"));
    assert!(!after(&text, "Outside context").contains("request_id"));
}

#[test]
fn bind_until_clear() {
    let (log, output) = capture_logs();

    log.bind(fields!(user_id = "user123"));
    log.info("With bound context", fields!());
    log.info("Still bound", fields!());
    log.clear();
    log.info("After clear", fields!());

    let text = output.contents();
    let lines = output.lines();
    assert!(lines[0].contains("user_id=user123"));
    assert!(lines[1].contains("user_id=user123"));
    assert!(!after(&text, "After clear").contains("user_id"));
}

#[test]
fn json_logging_in_production() {
    let (log, output) = capture_prod_logs();
    log.info("JSON test", fields!(key = "value"));

    let data: serde_json::Value = serde_json::from_str(output.contents().trim()).unwrap();
    assert_eq!(data["event"], "JSON test");
    assert_eq!(data["key"], "value");
    assert_eq!(data["level"], "info");
    assert!(data.get("timestamp").is_some());
}

#[test]
fn json_keys_are_sorted() {
    let (log, output) = capture_prod_logs();
    log.warning("sorted", fields!(zulu = 1, alpha = 2));

    let line = output.contents();
    let alpha = line.find("\"alpha\"").unwrap();
    let event = line.find("\"event\"").unwrap();
    let timestamp = line.find("\"timestamp\"").unwrap();
    let zulu = line.find("\"zulu\"").unwrap();
    assert!(alpha < event && event < timestamp && timestamp < zulu);
}

#[test]
fn staging_uses_json_too() {
    let (log, output) = capture(LoggingConfig::for_environment(Environment::Staging));
    log.info("staged", fields!());
    assert!(serde_json::from_str::<serde_json::Value>(output.contents().trim()).is_ok());
}

#[test]
fn paths_are_relative_to_cwd() {
    let (log, output) = capture_logs();
    let test_path = std::env::current_dir().unwrap().join("test").join("file.txt");
    log.info("Path test", fields!(file_path = test_path));

    let text = output.contents();
    assert!(!text.contains("PathBuf"));
    assert!(text.contains("file_path=test/file.txt"));
}

#[test]
fn paths_outside_cwd_are_kept() {
    let (log, output) = capture_logs();
    log.info("Path test", fields!(file_path = PathBuf::from("/definitely/elsewhere.txt")));
    assert!(output.contents().contains("file_path=/definitely/elsewhere.txt"));
}

#[test]
fn exception_formatting() {
    let (log, output) = capture_logs();
    log.exception("An error occurred", &ValueError("Test exception"), fields!());

    let text = output.contents();
    assert!(text.contains("An error occurred"));
    assert!(text.contains("ValueError"));
    assert!(text.contains("Test exception"));
}

#[test]
fn exception_in_production_is_structured() {
    let (log, output) = capture_prod_logs();
    log.exception("An error occurred", &ValueError("Test exception"), fields!());

    let data: serde_json::Value = serde_json::from_str(output.contents().trim()).unwrap();
    assert_eq!(data["level"], "error");
    let exception = &data["exception"][0];
    assert_eq!(exception["exc_type"], "ValueError");
    assert_eq!(exception["exc_value"], "Test exception");
    assert!(exception["frames"].as_array().unwrap().len() <= 5);
}

#[test]
fn level_filtering() {
    let (log, output) = capture(LoggingConfig::default().with_level(Level::Info));
    log.debug("Debug message", fields!());
    log.info("Info message", fields!());

    let text = output.contents();
    assert!(text.contains("Info message"));
    assert!(!text.contains("Debug message"));
}

#[test]
fn logger_name() {
    let (log, output) = capture_logs();
    log.named("custom_logger").info("Named logger test", fields!());

    let text = output.contents();
    assert!(text.contains("Named logger test"));
    assert!(text.contains("custom_logger"));
}

#[test]
fn nested_context() {
    let (log, output) = capture_logs();

    {
        let _outer = log.context(fields!(outer = "value"));
        log.info("Outer context", fields!());
        {
            let _inner = log.context(fields!(inner = "nested"));
            log.info("Nested context", fields!());
        }
        log.info("Back to outer", fields!());
    }

    let lines = output.lines();
    assert!(lines[0].contains("outer=value"));
    assert!(lines[1].contains("inner=nested"));
    assert!(lines[1].contains("outer=value"));
    assert!(lines[2].contains("outer=value"));
    assert!(!lines[2].contains("inner"));
}

#[test]
fn call_fields_win_over_bound_context() {
    let (log, output) = capture_logs();
    let _guard = log.context(fields!(source = "context"));
    log.info("collision", fields!(source = "call"));
    assert!(output.contents().contains("source=call"));
}

#[tokio::test]
async fn concurrent_scopes_do_not_leak() {
    let (log, output) = capture_logs();

    let first = {
        let log = log.clone();
        tokio::spawn(async move {
            log.scope(fields!(task = "first"), async {
                tokio::task::yield_now().await;
                log.info("from first", fields!());
            })
            .await
        })
    };
    let second = {
        let log = log.clone();
        tokio::spawn(async move {
            log.scope(fields!(task = "second"), async {
                tokio::task::yield_now().await;
                log.info("from second", fields!());
            })
            .await
        })
    };
    first.await.unwrap();
    second.await.unwrap();

    for line in output.lines() {
        if line.contains("from first") {
            assert!(line.contains("task=first"));
        } else {
            assert!(line.contains("task=second"));
        }
    }
}

#[test]
fn entities_and_ids_are_simplified() {
    let (log, output) = capture_prod_logs();
    let account = Account {
        attributes: CachedAttributes::with([("id", "42")]),
    };
    log.info(
        "account updated",
        fields!(account = FieldValue::entity(account), owner = FieldValue::id(AccountId(7))),
    );

    let data: serde_json::Value = serde_json::from_str(output.contents().trim()).unwrap();
    assert_eq!(data["account_id"], "42");
    assert!(data.get("account").is_none());
    assert_eq!(data["owner"], "acct_000007");
}

#[test]
fn failing_entity_is_reported_not_raised() {
    let (reporter, failures) = FailureReporter::in_memory();
    let out = MemoryWriter::new();
    let log = Logger::builder(LoggingConfig::default().with_no_color(true))
        .writer(out.clone())
        .failure_reporter(reporter)
        .build()
        .unwrap();

    let stale = Account {
        attributes: CachedAttributes::new(),
    };
    stale.attributes.expire();
    log.info("stale account", fields!(account = FieldValue::entity(stale), kept = true));

    let text = out.contents();
    assert!(text.contains("stale account"));
    assert!(text.contains("kept=true"));
    assert!(!text.contains("account_id"));

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].processor, "simplify_entities");
    assert_eq!(failures[0].event, "stale account");
}

#[test]
fn unprintable_id_is_reported_not_raised() {
    let (reporter, failures) = FailureReporter::in_memory();
    let out = MemoryWriter::new();
    let log = Logger::builder(LoggingConfig::for_environment(Environment::Production))
        .writer(out.clone())
        .failure_reporter(reporter)
        .build()
        .unwrap();

    log.info("order shipped", fields!(order = FieldValue::id(UnprintableId), kept = true));

    let lines = out.lines();
    assert_eq!(lines.len(), 1);
    let data: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(data["event"], "order shipped");
    assert_eq!(data["kept"], true);
    assert!(data.get("order").is_none());

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].processor, "simplify_entities");
    assert!(failures[0].error.contains("order"));
}

#[test]
fn log_path_is_ignored_in_production() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ignored.log");
    let log = Logger::new(LoggingConfig::for_environment(Environment::Production).with_log_path(&path))
        .unwrap();
    log.debug("never written", fields!());
    assert!(!path.exists());
}

#[test]
fn log_path_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "existing line\n").unwrap();

    let log = Logger::new(LoggingConfig::default().with_no_color(true).with_log_path(&path)).unwrap();
    log.info("appended", fields!());

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("existing line\n"));
    assert!(contents.contains("appended"));
}

#[test]
fn shared_pipeline_between_loggers() {
    let (log, _) = capture_logs();
    let other = Logger::builder(LoggingConfig::default())
        .pipeline(Arc::clone(log.pipeline()))
        .writer(MemoryWriter::new())
        .build()
        .unwrap();
    assert_eq!(log.pipeline().processor_names(), other.pipeline().processor_names());
}
