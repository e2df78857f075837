//! Off-loop persistence: the score cache snapshot and the append-only message log.
//!
//! The aggregator only ever enqueues [`StoreCommand`]s. A dedicated writer thread drains
//! the queue in order, so a slow disk never stalls event handling. Anything still queued
//! when the process dies without a flush is lost.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::{CacheMap, write_cache_file};
use crate::clock::Timestamp;
use crate::error::Result;

/// One scored message, as stored in the message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub user: String,
    pub message: String,
    pub score: f64,
    pub timestamp: Timestamp,
}

pub trait MessageLog: Send {
    fn append(&mut self, record: &LogRecord) -> Result<()>;
}

/// Appends one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlMessageLog {
    path: PathBuf,
}

impl JsonlMessageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageLog for JsonlMessageLog {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Keeps records in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageLog {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryMessageLog {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl MessageLog for MemoryMessageLog {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Reads a JSONL message log. Malformed lines are skipped with a warning.
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(line = index + 1, error = %err, "skipping malformed log line"),
        }
    }
    Ok(records)
}

#[derive(Debug)]
pub enum StoreCommand {
    /// Overwrite the cache file with this snapshot.
    SaveCache(CacheMap),
    Log(LogRecord),
    /// Acknowledged once every earlier command has been handled.
    Flush(oneshot::Sender<()>),
}

/// Cheap, cloneable sender side of the writer queue.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl WriterHandle {
    pub fn save_cache(&self, snapshot: CacheMap) {
        self.send(StoreCommand::SaveCache(snapshot));
    }

    pub fn log(&self, record: LogRecord) {
        self.send(StoreCommand::Log(record));
    }

    /// Queues a flush marker. `None` when the writer is gone.
    pub fn flush(&self) -> Option<oneshot::Receiver<()>> {
        let (ack, done) = oneshot::channel();
        self.tx.send(StoreCommand::Flush(ack)).ok().map(|_| done)
    }

    pub async fn flush_and_wait(&self) {
        if let Some(done) = self.flush() {
            if done.await.is_err() {
                warn!("durable writer stopped before acknowledging flush");
            }
        }
    }

    fn send(&self, command: StoreCommand) {
        if self.tx.send(command).is_err() {
            warn!("durable writer has stopped; dropping write");
        }
    }
}

pub struct DurableWriter {
    handle: WriterHandle,
    thread: JoinHandle<()>,
}

impl DurableWriter {
    /// Starts the writer thread. Either target may be absent, in which case the
    /// matching commands are accepted and discarded.
    pub fn spawn(cache_path: Option<PathBuf>, log: Option<Box<dyn MessageLog>>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name("chatlens-writer".into())
            .spawn(move || run_writer(rx, cache_path, log))?;
        Ok(Self {
            handle: WriterHandle { tx },
            thread,
        })
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Waits for the queue to drain. Returns once every handle has been dropped.
    pub fn join(self) {
        drop(self.handle);
        if self.thread.join().is_err() {
            warn!("durable writer thread panicked");
        }
    }
}

fn run_writer(
    mut rx: mpsc::UnboundedReceiver<StoreCommand>,
    cache_path: Option<PathBuf>,
    mut log: Option<Box<dyn MessageLog>>,
) {
    let mut cache_health = FailureStreak::new("score cache");
    let mut log_health = FailureStreak::new("message log");
    while let Some(command) = rx.blocking_recv() {
        match command {
            StoreCommand::SaveCache(snapshot) => {
                if let Some(path) = &cache_path {
                    cache_health.observe(write_cache_file(path, &snapshot));
                }
            }
            StoreCommand::Log(record) => {
                if let Some(log) = log.as_mut() {
                    log_health.observe(log.append(&record));
                }
            }
            StoreCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("durable writer stopped");
}

/// Warns on the first failure of a streak and reports recovery once.
#[derive(Debug)]
struct FailureStreak {
    store: &'static str,
    failures: u64,
}

impl FailureStreak {
    fn new(store: &'static str) -> Self {
        Self { store, failures: 0 }
    }

    fn observe(&mut self, result: Result<()>) {
        match result {
            Ok(()) => {
                if self.failures > 0 {
                    info!(store = self.store, failures = self.failures, "writes recovered");
                    self.failures = 0;
                }
            }
            Err(err) => {
                if self.failures == 0 {
                    warn!(
                        store = self.store,
                        error = %err,
                        "write failed; suppressing repeats until recovery"
                    );
                }
                self.failures += 1;
            }
        }
    }

    #[cfg(test)]
    fn is_failing(&self) -> bool {
        self.failures > 0
    }
}
