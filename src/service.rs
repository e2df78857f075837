//! Long-running service: host events, commands and timer ticks are merged into one
//! queue and handled by a single control loop that owns the [`Aggregator`].
//!
//! The host speaks a tab-separated line protocol on stdin:
//!
//! ```text
//! [timestamp<TAB>]kind<TAB>field<TAB>field...
//! /COMMAND
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::cache::ScoreCache;
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::Config;
use crate::error::Result;
use crate::event::{Command, RawEvent};
use crate::persistence::{DurableWriter, JsonlMessageLog, MessageLog};
use crate::report::{ReportAction, Sink};

const INPUT_QUEUE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Event(RawEvent),
    Command(Command),
    Tick,
    Shutdown,
}

pub trait ReportSink: Send {
    fn deliver(&mut self, action: &ReportAction);
}

/// Public reports are printed as-is; private ones get a `[private]` prefix per line.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn format(action: &ReportAction) -> String {
        match action.sink() {
            Sink::Public => action.text.clone(),
            Sink::Private => action
                .text
                .lines()
                .map(|line| format!("[private] {line}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl ReportSink for StdoutSink {
    fn deliver(&mut self, action: &ReportAction) {
        println!("{}", Self::format(action));
    }
}

/// Records deliveries; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    deliveries: Arc<Mutex<Vec<ReportAction>>>,
}

impl MemorySink {
    pub fn deliveries(&self) -> Vec<ReportAction> {
        self.deliveries.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn deliver(&mut self, action: &ReportAction) {
        self.deliveries.lock().push(action.clone());
    }
}

/// Parses one protocol line. Blank and unparseable lines yield `None`.
pub fn parse_line(line: &str, now: Timestamp) -> Option<Input> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    if line.trim_start().starts_with('/') {
        return match line.parse::<Command>() {
            Ok(command) => Some(Input::Command(command)),
            Err(err) => {
                warn!(error = %err, "ignoring command");
                None
            }
        };
    }

    let mut parts = line.split('\t').peekable();
    let time = match parts.peek().and_then(|first| first.trim().parse::<Timestamp>().ok()) {
        Some(time) => {
            parts.next();
            time
        }
        None => now,
    };
    let kind = parts.next().map(str::trim).filter(|kind| !kind.is_empty())?;
    Some(Input::Event(RawEvent::new(kind, parts, time)))
}

/// Drains `inputs` until `Shutdown` or until every sender is gone, then flushes the
/// writer and hands the aggregator back.
pub async fn run_loop<S: ReportSink>(
    mut aggregator: Aggregator,
    mut inputs: mpsc::Receiver<Input>,
    mut sink: S,
    tick_every: Duration,
) -> Aggregator {
    let mut ticker = time::interval(tick_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let input = tokio::select! {
            biased;
            _ = ticker.tick() => Input::Tick,
            input = inputs.recv() => input.unwrap_or(Input::Shutdown),
        };
        let action = match input {
            Input::Event(raw) => aggregator.handle_raw(&raw),
            Input::Command(command) => Some(aggregator.command(command)),
            Input::Tick => aggregator.tick(),
            Input::Shutdown => break,
        };
        if let Some(action) = action {
            sink.deliver(&action);
        }
    }

    debug!("control loop stopping");
    if let Some(done) = aggregator.shutdown() {
        if done.await.is_err() {
            warn!("writer stopped before the final flush");
        }
    }
    aggregator
}

async fn read_stdin(inputs: mpsc::Sender<Input>, clock: Arc<dyn Clock>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(input) = parse_line(&line, clock.now()) else {
                    continue;
                };
                if inputs.send(input).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed to read input");
                break;
            }
        }
    }
    debug!("input closed");
    let _ = inputs.send(Input::Shutdown).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Runs the service on stdin/stdout until input ends or a signal arrives.
pub async fn serve(config: &Config) -> Result<()> {
    config.prepare_storage()?;
    let lexicon = config.lexicon()?;
    let cache_path = config.cache_path();
    let cache = ScoreCache::open(&cache_path)?;
    let log = config
        .message_log_path()
        .map(|path| Box::new(JsonlMessageLog::new(path)) as Box<dyn MessageLog>);
    let writer = DurableWriter::spawn(Some(cache_path.clone()), log)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let aggregator = Aggregator::new(lexicon, cache, config.aggregator_options(), clock.clone())
        .with_writer(writer.handle());

    let (tx, rx) = mpsc::channel(INPUT_QUEUE);
    tokio::spawn(read_stdin(tx.clone(), clock));
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        let _ = tx.send(Input::Shutdown).await;
    });

    info!(
        cache = %cache_path.display(),
        policy = ?config.flush_policy(),
        "service started"
    );
    let aggregator = run_loop(aggregator, rx, StdoutSink, config.tick_interval()).await;
    drop(aggregator);
    if let Err(err) = tokio::task::spawn_blocking(move || writer.join()).await {
        warn!(error = %err, "failed to join writer");
    }
    info!("service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lexicon;
    use crate::aggregator::AggregatorOptions;
    use crate::clock::ManualClock;
    use crate::report::{FlushPolicy, ReportKind};

    fn aggregator(every: u64) -> Aggregator {
        Aggregator::new(
            Lexicon::embedded(),
            ScoreCache::in_memory(),
            AggregatorOptions {
                flush_policy: FlushPolicy::Count { every },
                ..AggregatorOptions::default()
            },
            Arc::new(ManualClock::at(500)),
        )
    }

    fn event(line: &str) -> Input {
        parse_line(line, 0).unwrap()
    }

    #[test]
    fn parses_events_with_and_without_timestamp() {
        assert_eq!(
            parse_line("100\tmessage\talice\thost.example\tthe dog", 5),
            Some(Input::Event(RawEvent::new(
                "message",
                ["alice", "host.example", "the dog"],
                100
            )))
        );
        assert_eq!(
            parse_line("away\tbob\r\n", 42),
            Some(Input::Event(RawEvent::new("away", ["bob"], 42)))
        );
        assert_eq!(parse_line("   ", 0), None);
        assert_eq!(parse_line("100", 0), None);
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_line("/SHOWUS", 0), Some(Input::Command(Command::ShowUs)));
        assert_eq!(
            parse_line(" /showscoreschat", 0),
            Some(Input::Command(Command::ShowScoresChat))
        );
        assert_eq!(parse_line("/NOPE", 0), None);
    }

    #[test]
    fn private_lines_are_prefixed() {
        let mut aggregator = aggregator(50);
        aggregator.handle_raw(&RawEvent::new("message", ["alice", "h", "the dog"], 1));
        let private = aggregator.command(Command::ShowScores);
        let public = aggregator.command(Command::ShowScoresChat);
        let text = StdoutSink::format(&private);
        assert!(text.lines().all(|line| line.starts_with("[private] ")));
        assert_eq!(StdoutSink::format(&public), public.text);
    }

    #[tokio::test]
    async fn loop_handles_inputs_in_order() {
        let (tx, rx) = mpsc::channel(16);
        let sink = MemorySink::default();
        let handle = tokio::spawn(run_loop(
            aggregator(2),
            rx,
            sink.clone(),
            Duration::from_secs(3600),
        ));

        tx.send(event("message\talice\th1\tthe dog ran home")).await.unwrap();
        tx.send(Input::Command(Command::ShowUs)).await.unwrap();
        tx.send(event("message\tbob\th2\tthe cat")).await.unwrap();
        tx.send(event("connect\tcarol")).await.unwrap();
        tx.send(Input::Shutdown).await.unwrap();
        let aggregator = handle.await.unwrap();

        let kinds: Vec<_> = sink
            .deliveries()
            .iter()
            .map(|action| action.report.kind)
            .collect();
        assert_eq!(kinds, vec![ReportKind::Usage, ReportKind::Periodic]);
        assert_eq!(sink.deliveries()[0].report.total_messages, 1);
        assert_eq!(sink.deliveries()[1].report.total_messages, 2);
        assert_eq!(aggregator.metrics().get("carol").unwrap().connect_count, 1);
    }

    #[tokio::test]
    async fn loop_stops_when_senders_are_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let sink = MemorySink::default();
        tx.send(Input::Command(Command::Metrics)).await.unwrap();
        drop(tx);
        let aggregator =
            run_loop(aggregator(50), rx, sink.clone(), Duration::from_secs(3600)).await;
        assert_eq!(sink.deliveries().len(), 1);
        assert!(aggregator.metrics().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_served_while_input_is_backlogged() {
        let clock = ManualClock::at(500);
        let aggregator = Aggregator::new(
            Lexicon::embedded(),
            ScoreCache::in_memory(),
            AggregatorOptions {
                flush_policy: FlushPolicy::Interval { every_secs: 60 },
                ..AggregatorOptions::default()
            },
            Arc::new(clock.clone()),
        );
        clock.advance(60);

        let (tx, rx) = mpsc::channel(64);
        for _ in 0..40 {
            tx.send(event("message\talice\th1\tthe dog")).await.unwrap();
        }
        tx.send(Input::Shutdown).await.unwrap();
        let sink = MemorySink::default();
        let aggregator = run_loop(aggregator, rx, sink.clone(), Duration::from_secs(3600)).await;

        let deliveries = sink.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].report.kind, ReportKind::Periodic);
        assert_eq!(deliveries[0].report.window_messages, 0);
        assert_eq!(aggregator.metrics().total_messages(), 40);
        assert_eq!(aggregator.scheduler().window_start(), 560);
        assert_eq!(aggregator.scheduler().messages_since_flush(), 40);
    }
}
