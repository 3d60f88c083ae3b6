//! Sink interface and fan-out
//!
//! Every sink runs on its own worker thread behind a bounded queue, so a
//! slow consumer (a blocked serial port, a full pipe) can lose records but
//! never stalls acquisition. On shutdown each worker gets [`DRAIN_GRACE`]
//! to work through its backlog; whatever is still queued after that is
//! discarded.

use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender, TrySendError};
use thiserror::Error;

use super::TelemetryRecord;

/// Errors a sink may report
#[derive(Error, Debug)]
pub enum SinkError {
    /// Writing to the sink's destination failed
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialized
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The receiving end has gone away
    #[error("Sink closed")]
    Closed,
}

/// Consumer of telemetry records
pub trait Sink: Send {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Deliver one record
    fn publish(&mut self, record: &TelemetryRecord) -> Result<(), SinkError>;

    /// Flush buffered output (called once when the dispatcher shuts down)
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// How long workers keep publishing queued records after shutdown begins
pub const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Log the first failure and then every 100th
fn should_report(count: u64) -> bool {
    count == 1 || count % 100 == 0
}

struct SinkWorker {
    name: String,
    sender: Option<Sender<TelemetryRecord>>,
    handle: Option<JoinHandle<()>>,
    dropped: u64,
}

impl SinkWorker {
    fn spawn(
        mut sink: Box<dyn Sink>,
        queue_depth: usize,
        drain_deadline: Arc<OnceLock<Instant>>,
    ) -> Result<Self, SinkError> {
        let name = sink.name().to_string();
        let (sender, receiver) = bounded::<TelemetryRecord>(queue_depth.max(1));

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("sink-{name}"))
            .spawn(move || {
                let mut failures = 0u64;
                let mut discarded = 0u64;
                for record in receiver.iter() {
                    if drain_deadline
                        .get()
                        .is_some_and(|deadline| Instant::now() >= *deadline)
                    {
                        discarded += 1;
                        continue;
                    }
                    if let Err(e) = sink.publish(&record) {
                        failures += 1;
                        if should_report(failures) {
                            tracing::warn!(sink = %thread_name, failures, "publish failed: {e}");
                        }
                    }
                }
                if discarded > 0 {
                    tracing::warn!(
                        sink = %thread_name,
                        discarded,
                        "discarded records queued past shutdown"
                    );
                }
                if let Err(e) = sink.flush() {
                    tracing::warn!(sink = %thread_name, "flush failed: {e}");
                }
                tracing::debug!(sink = %thread_name, "sink worker finished");
            })?;

        Ok(Self {
            name,
            sender: Some(sender),
            handle: Some(handle),
            dropped: 0,
        })
    }

    fn offer(&mut self, record: &TelemetryRecord) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(record.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if should_report(self.dropped) {
                    tracing::warn!(
                        sink = %self.name,
                        dropped = self.dropped,
                        "sink queue full, dropping record"
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(sink = %self.name, "sink worker stopped, detaching sink");
                self.sender = None;
            }
        }
    }

    fn join(&mut self) {
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(sink = %self.name, "sink worker panicked");
            }
        }
    }
}

/// Fans records out to every registered sink
pub struct SinkDispatcher {
    workers: Vec<SinkWorker>,
    drain_deadline: Arc<OnceLock<Instant>>,
}

impl SinkDispatcher {
    /// Start one worker per sink, each with a queue of `queue_depth` records
    pub fn new(sinks: Vec<Box<dyn Sink>>, queue_depth: usize) -> Result<Self, SinkError> {
        let drain_deadline = Arc::new(OnceLock::new());
        let workers = sinks
            .into_iter()
            .map(|sink| SinkWorker::spawn(sink, queue_depth, drain_deadline.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            workers,
            drain_deadline,
        })
    }

    /// Dispatcher with no sinks
    pub fn empty() -> Self {
        Self {
            workers: Vec::new(),
            drain_deadline: Arc::new(OnceLock::new()),
        }
    }

    /// Names of the registered sinks
    pub fn sink_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }

    /// Records dropped across all sinks because their queue was full
    pub fn dropped(&self) -> u64 {
        self.workers.iter().map(|w| w.dropped).sum()
    }

    /// Queue `record` for every sink without blocking
    pub fn publish(&mut self, record: &TelemetryRecord) {
        for worker in &mut self.workers {
            worker.offer(record);
        }
    }

    /// Close all queues and wait for the workers
    ///
    /// Workers keep publishing for [`DRAIN_GRACE`], then discard the rest of
    /// their queue, so this returns within the grace period plus one
    /// in-flight publish per sink.
    pub fn shutdown(&mut self) {
        let _ = self.drain_deadline.set(Instant::now() + DRAIN_GRACE);
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

impl Drop for SinkDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
