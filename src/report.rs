//! Report snapshots, their text rendering, and the flush trigger policy.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::metrics::UserMetrics;
use crate::readability::Readability;

const FRAME: &str = "-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-";
const NO_SCORES: &str = "No messages available to calculate scores.";
const NO_MESSAGES: &str = "No messages found.";

/// Where a report is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sink {
    /// Broadcast to the shared channel.
    Public,
    /// Notice to the requester only.
    #[default]
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Scheduled flush: running readability averages plus engagement metrics.
    Periodic,
    Scores,
    Usage,
    Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserReport {
    pub nick: String,
    pub readability: Option<Readability>,
    pub metrics: UserMetrics,
    /// Nicknames seen on the user's last host, including the user.
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub kind: ReportKind,
    pub sink: Sink,
    pub timestamp: Timestamp,
    /// Messages seen since startup.
    pub total_messages: u64,
    /// Messages seen since the last periodic flush.
    pub window_messages: u64,
    pub window_secs: u64,
    pub users: Vec<UserReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageShare {
    pub nick: String,
    pub count: u64,
    pub percent: f64,
}

impl Report {
    pub fn scored_users(&self) -> impl Iterator<Item = (&str, Readability)> {
        self.users.iter().filter_map(|user| {
            user.readability
                .map(|readability| (user.nick.as_str(), readability))
        })
    }

    /// Each user's share of all messages; users who never spoke are left out.
    pub fn usage_shares(&self) -> Vec<UsageShare> {
        let total: u64 = self.users.iter().map(|user| user.metrics.message_count).sum();
        if total == 0 {
            return Vec::new();
        }
        self.users
            .iter()
            .filter(|user| user.metrics.message_count > 0)
            .map(|user| UsageShare {
                nick: user.nick.clone(),
                count: user.metrics.message_count,
                percent: user.metrics.message_count as f64 / total as f64 * 100.0,
            })
            .collect()
    }

    pub fn away_percent(&self, metrics: &UserMetrics) -> f64 {
        if self.window_secs == 0 {
            return 0.0;
        }
        metrics.cumulative_away_secs as f64 / self.window_secs as f64 * 100.0
    }

    pub fn render(&self) -> String {
        match self.kind {
            ReportKind::Scores => self.render_scores(),
            ReportKind::Usage => self.render_usage(),
            ReportKind::Metrics => self.render_metrics(),
            ReportKind::Periodic => self.render_periodic(),
        }
    }

    fn render_scores(&self) -> String {
        let lines: Vec<String> = self
            .scored_users()
            .map(|(nick, readability)| format!("{nick}: {readability}"))
            .collect();
        if lines.is_empty() {
            return NO_SCORES.to_string();
        }
        let separator = match self.sink {
            Sink::Private => "\n",
            Sink::Public => ", ",
        };
        format!(
            "Total Messages Analyzed: {}\nReadability scores:\n{}",
            self.total_messages,
            lines.join(separator)
        )
    }

    fn render_usage(&self) -> String {
        let shares = self.usage_shares();
        if shares.is_empty() {
            return NO_MESSAGES.to_string();
        }
        let mut out = format!(
            "Total Messages: {}\nUser Contributions (% of Total):",
            self.total_messages
        );
        for share in shares {
            out.push_str(&format!(
                "\n{}: {} ({:.2}%)",
                share.nick, share.count, share.percent
            ));
        }
        out
    }

    fn render_metrics(&self) -> String {
        let mut out = format!("{FRAME}\nUser Metrics:");
        for user in &self.users {
            let metrics = &user.metrics;
            out.push_str(&format!(
                "\n{}: {} messages, {} connects, {} disconnects, {} away changes, \
                 {:.2} min away, {:.2}% away, Known Aliases: {}",
                user.nick,
                metrics.message_count,
                metrics.connect_count,
                metrics.disconnect_count,
                metrics.away_change_count,
                metrics.away_minutes(),
                self.away_percent(metrics),
                user.aliases.join(", ")
            ));
        }
        out.push('\n');
        out.push_str(FRAME);
        out
    }

    fn render_periodic(&self) -> String {
        let mut out = format!(
            "--- Average Readability Scores after {} messages ---",
            self.window_messages
        );
        for (nick, readability) in self.scored_users() {
            out.push_str(&format!(
                "\n{nick}'s average Dale-Chall readability score: {readability}"
            ));
        }
        out.push_str("\n--- End of Average Readability Scores ---\n");
        out.push_str(&self.render_metrics());
        out
    }
}

/// A report ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportAction {
    pub report: Report,
    pub text: String,
}

impl ReportAction {
    pub fn new(report: Report) -> Self {
        let text = report.render();
        Self { report, text }
    }

    pub fn sink(&self) -> Sink {
        self.report.sink
    }
}

/// When the aggregator flushes a periodic report on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// After this many messages since the last flush.
    Count { every: u64 },
    /// Once this many seconds have passed since the last flush, checked on ticks.
    Interval { every_secs: u64 },
    /// Only on-demand commands produce reports.
    Manual,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::Count { every: 50 }
    }
}

#[derive(Debug, Clone)]
pub struct ReportScheduler {
    policy: FlushPolicy,
    sink: Sink,
    since_flush: u64,
    window_start: Timestamp,
}

impl ReportScheduler {
    pub fn new(policy: FlushPolicy, sink: Sink, now: Timestamp) -> Self {
        Self {
            policy,
            sink,
            since_flush: 0,
            window_start: now,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn sink(&self) -> Sink {
        self.sink
    }

    /// Counts a processed message; true when a count-based flush is due.
    pub fn record_message(&mut self) -> bool {
        self.since_flush = self.since_flush.saturating_add(1);
        matches!(self.policy, FlushPolicy::Count { every } if self.since_flush >= every)
    }

    /// True when an interval-based flush is due at `now`.
    pub fn tick_due(&self, now: Timestamp) -> bool {
        match self.policy {
            FlushPolicy::Interval { every_secs } => self.window_secs(now) >= every_secs,
            FlushPolicy::Count { .. } | FlushPolicy::Manual => false,
        }
    }

    pub fn mark_flushed(&mut self, now: Timestamp) {
        self.since_flush = 0;
        self.window_start = now;
    }

    pub fn messages_since_flush(&self) -> u64 {
        self.since_flush
    }

    pub fn window_start(&self) -> Timestamp {
        self.window_start
    }

    pub fn window_secs(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.window_start)
    }
}
