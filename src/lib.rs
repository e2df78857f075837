mod data;

pub mod aggregator;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
#[cfg(feature = "tracing-subscriber")]
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod readability;
pub mod report;
#[cfg(feature = "service")]
pub mod service;

pub use aggregator::{Aggregator, AggregatorOptions};
pub use cache::{CachePolicy, ScoreCache};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{ChatEvent, Command, RawEvent};
pub use filter::{FilteredText, WordValidityFilter};
pub use metrics::{AliasIndex, MetricsStore, PresenceState, RepeatedAway, UserMetrics};
pub use persistence::{DurableWriter, JsonlMessageLog, LogRecord, MessageLog, WriterHandle};
pub use readability::{GradeLevel, GradeTable, Readability, ReadabilityScorer, TextStats};
pub use report::{FlushPolicy, Report, ReportAction, ReportKind, Sink};

use data::{build_set_bytes, normalize_word, parse_word_list};
use fst::Automaton;
use fst::automaton::Str;
use fst::{IntoStreamer, Set, Streamer};
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

static FAMILIAR_FST_BYTES: &[u8] = include_bytes!(env!("CHATLENS_FAMILIAR_FST"));
static DICTIONARY_FST_BYTES: &[u8] = include_bytes!(env!("CHATLENS_DICTIONARY_FST"));

static FAMILIAR_SET: Lazy<Set<&'static [u8]>> =
    Lazy::new(|| Set::new(FAMILIAR_FST_BYTES).expect("valid familiar-word fst"));
static DICTIONARY_SET: Lazy<Set<&'static [u8]>> =
    Lazy::new(|| Set::new(DICTIONARY_FST_BYTES).expect("valid dictionary fst"));

/// Word lookups backing the validity filter and the difficult-word count.
///
/// The familiar-word list is always the embedded one. The dictionary of valid words
/// defaults to the embedded list and can be replaced at runtime with a larger word file.
#[derive(Clone, Default)]
pub struct Lexicon {
    dictionary: Option<Arc<Set<Vec<u8>>>>,
}

impl Lexicon {
    pub fn embedded() -> Self {
        Self::default()
    }

    /// Builds a dictionary from exactly the provided words.
    pub fn from_words<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words: BTreeSet<String> = words
            .into_iter()
            .map(|word| normalize_word(word.as_ref().trim()))
            .filter(|word| !word.is_empty())
            .collect();
        Self::from_set(&words)
    }

    /// Loads a dictionary file (whitespace separated words, `#` comments). Familiar
    /// words are merged in so they are never filtered out.
    pub fn from_word_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut words = parse_word_list(&text);
        words.extend(familiar_words());
        Self::from_set(&words)
    }

    fn from_set(words: &BTreeSet<String>) -> Result<Self> {
        let bytes = build_set_bytes(words)?;
        let set = Set::new(bytes)?;
        Ok(Self {
            dictionary: Some(Arc::new(set)),
        })
    }

    /// Returns true when the token is a known word, ignoring case.
    pub fn is_valid(&self, word: &str) -> bool {
        let key = normalize_word(word);
        match &self.dictionary {
            Some(set) => set.contains(&key),
            None => DICTIONARY_SET.contains(&key),
        }
    }

    /// Returns true when the word is on the familiar-word list.
    pub fn is_familiar(&self, word: &str) -> bool {
        FAMILIAR_SET.contains(normalize_word(word))
    }

    /// Returns up to `limit` dictionary words that start with the provided prefix.
    pub fn prefix(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = normalize_word(prefix);
        match &self.dictionary {
            Some(set) => prefix_matches(&**set, &prefix, limit),
            None => prefix_matches(&*DICTIONARY_SET, &prefix, limit),
        }
    }

    pub fn len(&self) -> usize {
        match &self.dictionary {
            Some(set) => set.len(),
            None => DICTIONARY_SET.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn familiar_words() -> Vec<String> {
    FAMILIAR_SET.stream().into_strs().unwrap_or_default()
}

fn prefix_matches<D: AsRef<[u8]>>(set: &Set<D>, prefix: &str, limit: usize) -> Vec<String> {
    let automaton = Str::new(prefix).starts_with();
    let mut stream = set.search(automaton).into_stream();
    let mut results = Vec::new();
    while let Some(key) = stream.next() {
        if results.len() >= limit {
            break;
        }
        results.push(String::from_utf8_lossy(key).into_owned());
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_lists_cover_common_words() {
        let lexicon = Lexicon::embedded();
        assert!(lexicon.is_valid("dog"));
        assert!(lexicon.is_valid("Dog"));
        assert!(lexicon.is_valid("algorithm"));
        assert!(lexicon.is_familiar("dog"));
        assert!(!lexicon.is_familiar("algorithm"));
        assert!(!lexicon.is_valid("xqzzv"));
    }

    #[test]
    fn punctuation_is_part_of_the_token() {
        let lexicon = Lexicon::embedded();
        assert!(!lexicon.is_valid("dog."));
    }

    #[test]
    fn custom_word_set_replaces_dictionary() {
        let lexicon = Lexicon::from_words(["Alpha", "beta", " ", "beta"]).unwrap();
        assert!(lexicon.is_valid("alpha"));
        assert!(lexicon.is_valid("BETA"));
        assert!(!lexicon.is_valid("dog"));
        assert_eq!(lexicon.len(), 2);
    }

    #[test]
    fn word_file_merges_familiar_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        fs::write(&path, "# extra words\nzeitgeist\nquixotic # trailing comment\n").unwrap();
        let lexicon = Lexicon::from_word_file(&path).unwrap();
        assert!(lexicon.is_valid("zeitgeist"));
        assert!(lexicon.is_valid("quixotic"));
        assert!(lexicon.is_valid("dog"));
        assert!(!lexicon.is_valid("algorithm"));
    }

    #[test]
    fn prefix_is_sorted_and_limited() {
        let lexicon = Lexicon::from_words(["bird", "bill", "big", "dog"]).unwrap();
        assert_eq!(lexicon.prefix("Bi", 2), vec!["big", "bill"]);
        assert!(lexicon.prefix("x", 5).is_empty());
    }
}
