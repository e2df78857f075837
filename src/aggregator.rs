//! The single owner of all per-user state.
//!
//! Every event, tick and command goes through `&mut self`, so a report always reflects
//! exactly the events handled before it was built.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::Lexicon;
use crate::cache::{CachePolicy, ScoreCache};
use crate::clock::{Clock, Timestamp};
use crate::event::{ChatEvent, Command, RawEvent, classify};
use crate::filter::WordValidityFilter;
use crate::metrics::{AliasIndex, MetricsStore, RepeatedAway, Transition};
use crate::persistence::{LogRecord, WriterHandle};
use crate::readability::{GradeTable, Readability, ReadabilityScorer};
use crate::report::{
    FlushPolicy, Report, ReportAction, ReportKind, ReportScheduler, Sink, UserReport,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorOptions {
    pub grade_table: GradeTable,
    pub cache_policy: CachePolicy,
    pub repeated_away: RepeatedAway,
    pub flush_policy: FlushPolicy,
    /// Where scheduled reports go.
    pub periodic_sink: Sink,
}

#[derive(Debug, Clone, Copy, Default)]
struct ScoreWindow {
    sum: f64,
    count: u64,
}

impl ScoreWindow {
    fn add(&mut self, score: f64) {
        self.sum += score;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

pub struct Aggregator {
    filter: WordValidityFilter,
    scorer: ReadabilityScorer,
    metrics: MetricsStore,
    aliases: AliasIndex,
    cache: ScoreCache,
    cache_policy: CachePolicy,
    /// Per-message scores since the last periodic flush.
    window: BTreeMap<String, ScoreWindow>,
    scheduler: ReportScheduler,
    clock: Arc<dyn Clock>,
    writer: Option<WriterHandle>,
}

impl Aggregator {
    pub fn new(
        lexicon: Lexicon,
        cache: ScoreCache,
        options: AggregatorOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            filter: WordValidityFilter::new(lexicon.clone()),
            scorer: ReadabilityScorer::with_lexicon(lexicon, options.grade_table),
            metrics: MetricsStore::new(options.repeated_away),
            aliases: AliasIndex::default(),
            cache,
            cache_policy: options.cache_policy,
            window: BTreeMap::new(),
            scheduler: ReportScheduler::new(options.flush_policy, options.periodic_sink, now),
            clock,
            writer: None,
        }
    }

    /// Routes cache snapshots and message records through a background writer.
    pub fn with_writer(mut self, writer: WriterHandle) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_scorer(mut self, scorer: ReadabilityScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn handle_raw(&mut self, raw: &RawEvent) -> Option<ReportAction> {
        let event = classify(raw)?;
        self.handle(event)
    }

    pub fn handle(&mut self, event: ChatEvent) -> Option<ReportAction> {
        match event {
            ChatEvent::Message {
                actor,
                host,
                text,
                time,
            } => return self.on_message(actor, host, text, time),
            ChatEvent::Connect { actor, .. } => self.metrics.record_connect(&actor),
            ChatEvent::Disconnect { actor, .. } => self.metrics.record_disconnect(&actor),
            ChatEvent::Away { actor, time } => {
                let transition = self.metrics.record_away(&actor, time);
                debug!(%actor, ?transition, "away");
            }
            ChatEvent::Back { actor, time } => {
                let transition = self.metrics.record_back(&actor, time);
                if let Transition::Returned { away_secs } = transition {
                    debug!(%actor, away_secs, "back");
                }
            }
        }
        None
    }

    fn on_message(
        &mut self,
        actor: String,
        host: String,
        text: String,
        time: Timestamp,
    ) -> Option<ReportAction> {
        self.metrics.record_message(&actor, &host);
        if self.aliases.record(&host, &actor) {
            debug!(%actor, %host, "new alias");
        }
        if self.cache_policy == CachePolicy::InvalidateOnMessage && self.cache.invalidate(&actor) {
            debug!(%actor, "dropped cached score");
        }

        let readability = self.score_text(&text);
        self.window.entry(actor.clone()).or_default().add(readability.score);
        if let Some(writer) = &self.writer {
            writer.log(LogRecord {
                user: actor,
                message: text,
                score: readability.score,
                timestamp: time,
            });
        }

        if self.scheduler.record_message() {
            return Some(self.flush(time));
        }
        None
    }

    /// Wall-clock check for interval-based flushing.
    pub fn tick(&mut self) -> Option<ReportAction> {
        let now = self.clock.now();
        if self.scheduler.tick_due(now) {
            Some(self.flush(now))
        } else {
            None
        }
    }

    /// Answers an on-demand command. Periodic trigger state is left alone.
    pub fn command(&mut self, command: Command) -> ReportAction {
        let now = self.clock.now();
        let (kind, sink) = match command {
            Command::ShowScores => (ReportKind::Scores, Sink::Private),
            Command::ShowScoresChat => (ReportKind::Scores, Sink::Public),
            Command::ShowUs => (ReportKind::Usage, Sink::Private),
            Command::Metrics => (ReportKind::Metrics, Sink::Private),
        };
        debug!(command = %command, "on-demand report");
        ReportAction::new(self.build_report(kind, sink, now))
    }

    /// Filters then scores one message; text with no valid words scores zero.
    pub fn score_text(&self, text: &str) -> Readability {
        match self.filter.filter(text).scorable() {
            Some(filtered) => self.scorer.score(filtered),
            None => self.scorer.empty(),
        }
    }

    fn flush(&mut self, now: Timestamp) -> ReportAction {
        let report = self.build_report(ReportKind::Periodic, self.scheduler.sink(), now);
        info!(
            window_messages = report.window_messages,
            users = report.users.len(),
            "periodic report"
        );
        self.window.clear();
        self.scheduler.mark_flushed(now);
        ReportAction::new(report)
    }

    fn build_report(&mut self, kind: ReportKind, sink: Sink, now: Timestamp) -> Report {
        let mut nicks: BTreeSet<String> = self.metrics.nicks().map(str::to_string).collect();
        if kind == ReportKind::Scores {
            nicks.extend(self.cache.entries().keys().cloned());
        }

        let mut cache_dirty = false;
        let mut users = Vec::with_capacity(nicks.len());
        for nick in nicks {
            let readability = match kind {
                ReportKind::Periodic => {
                    let (readability, computed) = self.refresh_readability(&nick);
                    cache_dirty |= computed;
                    readability
                }
                ReportKind::Scores => {
                    let (readability, computed) = self.resolve_readability(&nick);
                    cache_dirty |= computed;
                    readability
                }
                ReportKind::Usage | ReportKind::Metrics => None,
            };
            let metrics = self.metrics.get(&nick).cloned().unwrap_or_default();
            let aliases = match metrics.host.as_deref() {
                Some(host) => self
                    .aliases
                    .aliases(host)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                None => Vec::new(),
            };
            users.push(UserReport {
                nick,
                readability,
                metrics,
                aliases,
            });
        }
        if cache_dirty {
            self.persist_cache();
        }

        Report {
            kind,
            sink,
            timestamp: now,
            total_messages: self.metrics.total_messages(),
            window_messages: self.scheduler.messages_since_flush(),
            window_secs: self.scheduler.window_secs(now),
            users,
        }
    }

    /// Cached score if present, otherwise the window mean (which is then cached).
    /// The flag is true when a new entry was cached.
    fn resolve_readability(&mut self, nick: &str) -> (Option<Readability>, bool) {
        if let Some(hit) = self.cache.get(nick) {
            return (Some(hit), false);
        }
        let Some(mean) = self.window.get(nick).and_then(ScoreWindow::mean) else {
            return (None, false);
        };
        let readability = self.scorer.rate(mean);
        self.cache.put(nick, readability.score, readability.grade);
        (Some(readability), true)
    }

    /// Window mean for users who spoke since the last flush, written through to the
    /// cache. Users who stayed quiet keep their cached score.
    fn refresh_readability(&mut self, nick: &str) -> (Option<Readability>, bool) {
        match self.window.get(nick).and_then(ScoreWindow::mean) {
            Some(mean) => {
                let readability = self.scorer.rate(mean);
                self.cache.put(nick, readability.score, readability.grade);
                (Some(readability), true)
            }
            None => (self.cache.get(nick), false),
        }
    }

    /// Current readability for a user without touching the cache.
    pub fn readability(&self, nick: &str) -> Option<Readability> {
        self.cache.get(nick).or_else(|| {
            self.window
                .get(nick)
                .and_then(ScoreWindow::mean)
                .map(|mean| self.scorer.rate(mean))
        })
    }

    /// Hands the cache to the writer, or saves inline when there is none.
    pub fn persist_cache(&self) {
        match &self.writer {
            Some(writer) => writer.save_cache(self.cache.snapshot()),
            None => {
                if let Err(err) = self.cache.save() {
                    warn!(error = %err, "failed to save score cache");
                }
            }
        }
    }

    /// Saves the cache and queues a flush marker behind it.
    pub fn shutdown(&self) -> Option<oneshot::Receiver<()>> {
        self.persist_cache();
        self.writer.as_ref().and_then(WriterHandle::flush)
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn aliases(&self) -> &AliasIndex {
        &self.aliases
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &ReportScheduler {
        &self.scheduler
    }
}
