//! Reporting of processor failures to an external error sink.
//!
//! Processors run on the logging call path, possibly after a response was
//! already sent, so their failures are never returned to the caller.
//! Instead they are queued to a [`FailureSink`] running on a background
//! task, in the spirit of an error-tracking integration.

use crate::error::ProcessorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// A processor that failed while handling one event.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorFailure {
    pub timestamp: DateTime<Utc>,
    pub processor: String,
    pub logger: String,
    /// Message of the event being processed.
    pub event: String,
    pub error: String,
}

impl ProcessorFailure {
    pub fn new(processor: &str, logger: &str, event: &str, error: &ProcessorError) -> Self {
        Self {
            timestamp: Utc::now(),
            processor: processor.to_string(),
            logger: logger.to_string(),
            event: event.to_string(),
            error: error.to_string(),
        }
    }
}

/// Asynchronous destination for [`ProcessorFailure`]s.
///
/// `send` is called from a background task, never on the logging thread.
#[async_trait]
pub trait FailureSink: Send + Sync {
    /// Deliver one failure. An `Err` is treated as transient and retried
    /// with backoff.
    async fn send(&self, failure: &ProcessorFailure) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Flush any buffered failures. Default implementation is a no-op.
    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// A sink that drops every failure.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl FailureSink for NoopSink {
    async fn send(&self, _failure: &ProcessorFailure) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// A sink that prints failures to stderr.
#[derive(Clone, Default)]
pub struct StderrSink;

#[async_trait]
impl FailureSink for StderrSink {
    async fn send(&self, failure: &ProcessorFailure) -> Result<(), Box<dyn Error + Send + Sync>> {
        print_failure(failure);
        Ok(())
    }
}

fn print_failure(failure: &ProcessorFailure) {
    eprintln!(
        "log processor `{}` failed for {:?} on logger `{}`: {}",
        failure.processor, failure.event, failure.logger, failure.error
    );
}

const MAX_SEND_ATTEMPTS: u32 = 5;

#[derive(Clone)]
enum Target {
    Stderr,
    Channel(mpsc::Sender<ProcessorFailure>),
    Memory(Arc<Mutex<Vec<ProcessorFailure>>>),
}

/// Hands processor failures to their destination without blocking.
#[derive(Clone)]
pub struct FailureReporter {
    target: Target,
    /// Failures accepted for delivery.
    pub reported: Arc<AtomicU64>,
    /// Failures dropped because the queue was full or closed.
    pub dropped: Arc<AtomicU64>,
}

impl FailureReporter {
    fn with_target(target: Target) -> Self {
        Self {
            target,
            reported: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Print failures to stderr synchronously. Needs no runtime.
    pub fn stderr() -> Self {
        Self::with_target(Target::Stderr)
    }

    /// Keep failures in memory, mostly for tests.
    pub fn in_memory() -> (Self, Arc<Mutex<Vec<ProcessorFailure>>>) {
        let store = Arc::new(Mutex::new(Vec::new()));
        (Self::with_target(Target::Memory(Arc::clone(&store))), store)
    }

    /// Queue failures to `sink` through a bounded channel drained by a
    /// background task.
    ///
    /// Must be called from within a Tokio runtime. The task exits once every
    /// clone of the reporter is dropped and the queue is drained.
    pub fn spawn(sink: Arc<dyn FailureSink>, buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ProcessorFailure>(buffer.max(16));

        let handle = tokio::spawn(async move {
            while let Some(failure) = rx.recv().await {
                if let Err(e) = send_with_retry(&*sink, &failure).await {
                    eprintln!("giving up on log processor failure report: {}", e);
                }
            }
            if let Err(e) = sink.flush().await {
                eprintln!("error flushing failure sink: {}", e);
            }
        });

        (Self::with_target(Target::Channel(tx)), handle)
    }

    /// [`spawn`](Self::spawn) when a Tokio runtime is available, otherwise
    /// fall back to [`stderr`](Self::stderr).
    pub fn spawn_or_stderr(sink: Arc<dyn FailureSink>, buffer: usize) -> Self {
        match tokio::runtime::Handle::try_current() {
            Ok(_) => Self::spawn(sink, buffer).0,
            Err(_) => Self::stderr(),
        }
    }

    /// Report a failure. Never blocks and never fails.
    pub fn report(&self, failure: ProcessorFailure) {
        match &self.target {
            Target::Stderr => {
                print_failure(&failure);
                self.reported.fetch_add(1, Ordering::Relaxed);
            }
            Target::Memory(store) => match store.lock() {
                Ok(mut failures) => {
                    failures.push(failure);
                    self.reported.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            Target::Channel(sender) => match sender.try_send(failure) {
                Ok(()) => {
                    self.reported.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    eprintln!("failure queue full, dropping processor failure");
                }
            },
        }
    }
}

async fn send_with_retry(
    sink: &dyn FailureSink,
    failure: &ProcessorFailure,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(10);
    let mut attempt = 1;

    loop {
        match sink.send(failure).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= MAX_SEND_ATTEMPTS => return Err(e),
            Err(_) => {
                eprintln!("failure sink send failed, retrying in {:?}", backoff);
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, max_backoff);
                attempt += 1;
            }
        }
    }
}

/// Ships failures as JSON to an HTTP endpoint, e.g. an error tracker's
/// ingestion hook.
#[cfg(feature = "webhook")]
pub mod webhook {
    use super::{FailureSink, ProcessorFailure};
    use async_trait::async_trait;
    use reqwest::Client;
    use serde::Serialize;
    use std::error::Error;

    /// Configuration for [`WebhookSink`].
    #[derive(Clone, Debug)]
    pub struct WebhookConfig {
        pub url: String,
        pub service_name: Option<String>,
        pub bearer_token: Option<String>,
    }

    #[derive(Clone)]
    pub struct WebhookSink {
        client: Client,
        config: WebhookConfig,
    }

    #[derive(Serialize)]
    struct Payload<'a> {
        service_name: Option<&'a str>,
        #[serde(flatten)]
        failure: &'a ProcessorFailure,
    }

    impl WebhookSink {
        pub fn new(config: WebhookConfig) -> Self {
            Self {
                client: Client::new(),
                config,
            }
        }
    }

    #[async_trait]
    impl FailureSink for WebhookSink {
        async fn send(&self, failure: &ProcessorFailure) -> Result<(), Box<dyn Error + Send + Sync>> {
            let payload = Payload {
                service_name: self.config.service_name.as_deref(),
                failure,
            };
            let mut request = self.client.post(&self.config.url).json(&payload);
            if let Some(token) = &self.config.bearer_token {
                request = request.bearer_auth(token);
            }

            let resp = request.send().await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
                Err(format!("failure webhook returned status {}: {}", status, text).into())
            }
        }
    }
}
