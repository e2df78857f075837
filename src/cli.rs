use std::cmp;
use std::collections::BTreeMap;
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use atty::Stream;
use chatlens::cache::read_cache_file;
use chatlens::persistence::read_log;
use chatlens::readability::round2;
use chatlens::{
    Config, GradeTable, LogRecord, Readability, ReadabilityScorer, TextStats, WordValidityFilter,
};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};

const DEFAULT_SENTENCE: &str = "The quick brown fox jumps over the lazy dog.";

#[derive(Parser, Debug)]
#[command(name = "chatlens", about = "Chat readability and engagement analytics", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the analytics service on the stdin line protocol.
    #[cfg(feature = "service")]
    Run,
    /// Filter and score text; prompts interactively when no text is given.
    Analyze {
        /// Sentences to analyze.
        text: Vec<String>,
        /// Grade table: decimal or whole.
        #[arg(long)]
        table: Option<GradeTable>,
    },
    /// Explore the word dictionary.
    #[command(subcommand)]
    Words(WordsCommand),
    /// Query the message log.
    #[command(subcommand)]
    Log(LogCommand),
    /// Inspect the persisted score cache.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum WordsCommand {
    /// Report whether each word is valid and familiar.
    Check {
        #[arg(required = true)]
        words: Vec<String>,
    },
    /// List dictionary words that start with the provided prefix.
    Prefix {
        prefix: String,
        /// Maximum number of matches to return.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum LogCommand {
    /// Search logged messages by user and keyword, or average scores per user.
    Query {
        /// Log file; defaults to the configured message log.
        #[arg(long)]
        path: Option<PathBuf>,
        /// Only messages from this user.
        #[arg(long)]
        user: Option<String>,
        /// Only messages containing this keyword (case-insensitive).
        #[arg(long)]
        keyword: Option<String>,
        /// Rescore every message and print per-user averages.
        #[arg(long)]
        averages: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Print every cached score.
    Show {
        /// Cache file; defaults to the configured one.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    chatlens::logging::init(cli.verbose);
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    match cli.command {
        #[cfg(feature = "service")]
        Command::Run => handle_run(&config),
        Command::Analyze { text, table } => handle_analyze(&config, text, table, cli.json),
        Command::Words(WordsCommand::Check { words }) => handle_check(&config, words, cli.json),
        Command::Words(WordsCommand::Prefix { prefix, limit }) => {
            handle_prefix(&config, prefix, limit, cli.json)
        }
        Command::Log(LogCommand::Query {
            path,
            user,
            keyword,
            averages,
        }) => {
            let query = LogQuery {
                user,
                keyword,
                averages,
            };
            handle_log_query(&config, path, query, cli.json)
        }
        Command::Cache(CacheCommand::Show { path }) => {
            let path = path.unwrap_or_else(|| config.cache_path());
            handle_cache_show(&path, cli.json)
        }
    }
}

#[cfg(feature = "service")]
fn handle_run(config: &Config) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(chatlens::service::serve(config));
    // stdin reads park a blocking thread that would otherwise hold up runtime drop
    runtime.shutdown_timeout(std::time::Duration::from_millis(250));
    Ok(result?)
}

struct Analyzer {
    filter: WordValidityFilter,
    scorer: ReadabilityScorer,
}

struct Analysis {
    filtered: String,
    stats: TextStats,
    readability: Readability,
}

impl Analyzer {
    fn new(config: &Config, table: Option<GradeTable>) -> Result<Self, Box<dyn Error>> {
        let lexicon = config.lexicon()?;
        let table = table.unwrap_or(config.scoring.grade_table);
        Ok(Self {
            filter: WordValidityFilter::new(lexicon.clone()),
            scorer: ReadabilityScorer::with_lexicon(lexicon, table),
        })
    }

    fn analyze(&self, text: &str) -> Analysis {
        let filtered = self.filter.filter(text);
        let (stats, readability) = match filtered.scorable() {
            Some(scorable) => self.scorer.analyze(scorable),
            None => (TextStats::default(), self.scorer.empty()),
        };
        Analysis {
            filtered: filtered.into_string(),
            stats,
            readability,
        }
    }
}

fn analysis_to_json(text: &str, analysis: &Analysis) -> serde_json::Value {
    json!({
        "text": text,
        "filtered": analysis.filtered,
        "stats": analysis.stats,
        "score": analysis.readability.score,
        "grade": analysis.readability.grade.label(),
    })
}

fn print_analysis(text: &str, analysis: &Analysis) {
    let markdown = format!(
        "| | |\n|-|-|\n| Text | {} |\n| Filtered | {} |\n| Words | {} |\n| Sentences | {} |\n\
         | Difficult words | {} |\n| Dale-Chall score | {:.2} |\n| Grade level | {} |\n",
        escape_cell(text),
        escape_cell(&analysis.filtered),
        analysis.stats.words,
        analysis.stats.sentences,
        analysis.stats.difficult_words,
        analysis.readability.score,
        analysis.readability.grade
    );
    if stdout_is_tty() {
        let skin = MadSkin::default();
        println!("{}", FmtText::from(&skin, &markdown, Some(markdown_width())));
    } else {
        println!("Filtered text: {}", analysis.filtered);
        println!("Dale-Chall readability score: {:.2}", analysis.readability.score);
        println!("Grade level: {}", analysis.readability.grade);
    }
}

fn handle_analyze(
    config: &Config,
    text: Vec<String>,
    table: Option<GradeTable>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let analyzer = Analyzer::new(config, table)?;
    if !text.is_empty() {
        let results: Vec<(String, Analysis)> = text
            .into_iter()
            .map(|sentence| {
                let analysis = analyzer.analyze(&sentence);
                (sentence, analysis)
            })
            .collect();
        if as_json {
            let payload: Vec<_> = results
                .iter()
                .map(|(sentence, analysis)| analysis_to_json(sentence, analysis))
                .collect();
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            for (sentence, analysis) in &results {
                print_analysis(sentence, analysis);
            }
        }
        return Ok(());
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Enter a sentence (or 'exit' to quit): ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.eq_ignore_ascii_case("exit") {
            break;
        }
        let sentence = if input.is_empty() { DEFAULT_SENTENCE } else { input };
        let analysis = analyzer.analyze(sentence);
        if as_json {
            println!("{}", analysis_to_json(sentence, &analysis));
        } else {
            print_analysis(sentence, &analysis);
        }
    }
    Ok(())
}

fn handle_check(config: &Config, words: Vec<String>, as_json: bool) -> Result<(), Box<dyn Error>> {
    let lexicon = config.lexicon()?;
    let rows: Vec<(String, bool, bool)> = words
        .into_iter()
        .map(|word| {
            let valid = lexicon.is_valid(&word);
            let familiar = lexicon.is_familiar(&word);
            (word, valid, familiar)
        })
        .collect();

    if as_json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(word, valid, familiar)| {
                json!({"word": word, "valid": valid, "familiar": familiar})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_check_table(&rows);
    }
    Ok(())
}

fn handle_prefix(
    config: &Config,
    prefix: String,
    limit: usize,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let lexicon = config.lexicon()?;
    let limit = cmp::max(1, limit);
    let matches = lexicon.prefix(&prefix, limit);

    if as_json {
        let payload = json!({
            "prefix": prefix,
            "limit": limit,
            "results": matches,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if matches.is_empty() {
        println!("No words matched prefix \"{prefix}\".");
    } else {
        println!("Matches for prefix \"{prefix}\":");
        for word in &matches {
            println!("  {word}");
        }
    }
    Ok(())
}

struct LogQuery {
    user: Option<String>,
    keyword: Option<String>,
    averages: bool,
}

impl LogQuery {
    fn matches(&self, record: &LogRecord) -> bool {
        let user_ok = self
            .user
            .as_deref()
            .is_none_or(|user| record.user.eq_ignore_ascii_case(user));
        let keyword_ok = self.keyword.as_deref().is_none_or(|keyword| {
            record
                .message
                .to_lowercase()
                .contains(&keyword.to_lowercase())
        });
        user_ok && keyword_ok
    }
}

fn handle_log_query(
    config: &Config,
    path: Option<PathBuf>,
    query: LogQuery,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let path = path
        .or_else(|| config.message_log_path())
        .ok_or("no message log configured; pass --path or set storage.message_log")?;
    let records: Vec<LogRecord> = read_log(&path)?
        .into_iter()
        .filter(|record| query.matches(record))
        .collect();

    if query.averages {
        let averages = average_scores(config.scoring.grade_table, &records);
        if as_json {
            let users: Vec<_> = averages
                .iter()
                .map(|(user, readability)| {
                    json!({
                        "user": user,
                        "score": readability.score,
                        "grade": readability.grade.label(),
                    })
                })
                .collect();
            let payload = json!({
                "total_messages": records.len(),
                "users": users,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            print_averages(records.len(), &averages);
        }
        return Ok(());
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No messages found.");
    } else {
        for record in &records {
            println!(
                "[{}] {}: {} ({:.2})",
                record.timestamp, record.user, record.message, record.score
            );
        }
    }
    Ok(())
}

/// Averages the stored per-message scores for each user.
fn average_scores(table: GradeTable, records: &[LogRecord]) -> BTreeMap<String, Readability> {
    let totals = records
        .par_iter()
        .fold(BTreeMap::<&str, (f64, u64)>::new, |mut totals, record| {
            let entry = totals.entry(record.user.as_str()).or_default();
            entry.0 += record.score;
            entry.1 += 1;
            totals
        })
        .reduce(BTreeMap::new, |mut left, right| {
            for (user, (sum, count)) in right {
                let entry = left.entry(user).or_default();
                entry.0 += sum;
                entry.1 += count;
            }
            left
        });
    totals
        .into_iter()
        .map(|(user, (sum, count))| {
            let score = round2(sum / count as f64);
            let readability = Readability {
                score,
                grade: table.grade(score),
            };
            (user.to_string(), readability)
        })
        .collect()
}

fn print_averages(total: usize, averages: &BTreeMap<String, Readability>) {
    println!("--- Average Readability Scores for All Users ---");
    println!("--- Total Messages Analyzed {total} ---");
    println!("--- Generated at {} ---", chatlens::clock::now_ts());
    for (user, readability) in averages {
        println!(
            "{user}'s average Dale-Chall readability score: {:.2} ({})",
            readability.score, readability.grade
        );
    }
    println!("--- End of Average Readability Scores ---");
}

fn handle_cache_show(path: &Path, as_json: bool) -> Result<(), Box<dyn Error>> {
    let entries = read_cache_file(path)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("Score cache at {} is empty.", path.display());
        return Ok(());
    }
    let width = entries
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(4)
        .max("USER".len());
    println!("{:<width$}  {:>6}  {}", "USER", "SCORE", "GRADE", width = width);
    println!("{:-<width$}  {:->6}  {}", "", "", "-----", width = width);
    for (user, readability) in &entries {
        println!(
            "{:<width$}  {:>6.2}  {}",
            user,
            readability.score,
            readability.grade,
            width = width
        );
    }
    Ok(())
}

fn print_check_table(rows: &[(String, bool, bool)]) {
    let width = rows
        .iter()
        .map(|(word, _, _)| word.len())
        .max()
        .unwrap_or(4)
        .max("WORD".len());
    println!("{:<width$}  {:<5}  {}", "WORD", "VALID", "FAMILIAR", width = width);
    println!("{:-<width$}  {:-<5}  {}", "", "", "--------", width = width);
    for (word, valid, familiar) in rows {
        println!("{:<width$}  {:<5}  {}", word, valid, familiar, width = width);
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, message: &str, score: f64) -> LogRecord {
        LogRecord {
            user: user.into(),
            message: message.into(),
            score,
            timestamp: 1_000,
        }
    }

    #[test]
    fn log_query_filters_by_user_and_keyword_ignoring_case() {
        let query = LogQuery {
            user: Some("Alice".into()),
            keyword: Some("DOG".into()),
            averages: false,
        };
        assert!(query.matches(&record("alice", "the dog ran home", 0.2)));
        assert!(!query.matches(&record("bob", "the dog ran home", 0.2)));
        assert!(!query.matches(&record("alice", "the cat sat", 0.2)));

        let everything = LogQuery {
            user: None,
            keyword: None,
            averages: true,
        };
        assert!(everything.matches(&record("bob", "", 0.0)));
    }

    #[test]
    fn averages_use_the_stored_scores() {
        // Stored scores are averaged as logged, even when rescoring the text would differ.
        let records = [
            record("alice", "the dog ran home", 4.0),
            record("alice", "the dog ran home", 6.0),
            record("bob", "algorithm complicated", 19.53),
        ];
        let averages = average_scores(GradeTable::Decimal, &records);
        assert_eq!(averages.len(), 2);
        assert_eq!(averages["alice"].score, 5.0);
        assert_eq!(averages["alice"].grade, GradeTable::Decimal.grade(5.0));
        assert_eq!(averages["bob"].score, 19.53);
        assert_eq!(averages["bob"].grade.label(), "College Level");
        assert!(average_scores(GradeTable::Whole, &[]).is_empty());
    }
}
