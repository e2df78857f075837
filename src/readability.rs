//! Dale-Chall scoring and grade-level bucketing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Lexicon;

const DIFFICULT_WEIGHT: f64 = 0.1579;
const SENTENCE_WEIGHT: f64 = 0.0496;
const DIFFICULT_ADJUSTMENT: f64 = 3.6365;
const DIFFICULT_THRESHOLD_PCT: f64 = 5.0;

/// Counts produced by the tokenizer for one piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TextStats {
    pub words: usize,
    pub sentences: usize,
    pub difficult_words: usize,
    pub syllables: usize,
}

impl TextStats {
    pub fn difficult_ratio(&self) -> f64 {
        if self.words == 0 {
            return 0.0;
        }
        self.difficult_words as f64 / self.words as f64
    }

    pub fn words_per_sentence(&self) -> f64 {
        self.words as f64 / self.sentences.max(1) as f64
    }
}

/// Sentence splitting, word validity and familiarity lookups.
pub trait TextAnalyzer: Send + Sync {
    fn tokenize_and_score(&self, text: &str) -> TextStats;
}

/// Tokenizer backed by the embedded familiar-word list.
#[derive(Clone, Default)]
pub struct LexiconAnalyzer {
    lexicon: Lexicon,
}

impl LexiconAnalyzer {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }
}

impl TextAnalyzer for LexiconAnalyzer {
    fn tokenize_and_score(&self, text: &str) -> TextStats {
        let mut stats = TextStats::default();
        for token in text.split_whitespace() {
            let word = trim_token(token);
            if word.is_empty() {
                continue;
            }
            stats.words += 1;
            stats.syllables += count_syllables(word);
            let numeric = word.chars().all(|ch| ch.is_ascii_digit());
            if !numeric && !self.lexicon.is_familiar(word) {
                stats.difficult_words += 1;
            }
        }
        if stats.words > 0 {
            stats.sentences = count_sentences(text).max(1);
        }
        stats
    }
}

fn trim_token(token: &str) -> &str {
    token.trim_matches(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
}

fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|segment| segment.chars().any(char::is_alphanumeric))
        .count()
}

fn count_syllables(word: &str) -> usize {
    let lower = word.to_lowercase();
    let mut groups = 0;
    let mut previous_vowel = false;
    for ch in lower.chars() {
        let vowel = matches!(ch, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !previous_vowel {
            groups += 1;
        }
        previous_vowel = vowel;
    }
    if groups > 1 && lower.ends_with('e') && !lower.ends_with("le") {
        groups -= 1;
    }
    groups.max(1)
}

/// Named grade-level bucket tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeTable {
    /// `.9`-terminated bands from "4th Grade or below" to "College Level".
    #[default]
    Decimal,
    /// Whole-number bands from "Kindergarten" to "College level".
    Whole,
}

struct Band {
    upper: f64,
    inclusive: bool,
    label: &'static str,
}

const fn band(upper: f64, inclusive: bool, label: &'static str) -> Band {
    Band {
        upper,
        inclusive,
        label,
    }
}

const DECIMAL_BANDS: &[Band] = &[
    band(4.9, true, "4th Grade or below"),
    band(5.9, true, "5th - 6th Grade"),
    band(6.9, true, "7th - 8th Grade"),
    band(7.9, true, "9th - 10th Grade"),
    band(8.9, true, "11th - 12th Grade"),
    band(f64::INFINITY, true, "College Level"),
];

const WHOLE_BANDS: &[Band] = &[
    band(4.0, false, "Kindergarten"),
    band(6.0, false, "1st to 3rd grade"),
    band(8.0, false, "4th to 5th grade"),
    band(10.0, false, "6th to 8th grade"),
    band(12.0, false, "9th to 10th grade"),
    band(14.0, false, "11th to 12th grade"),
    band(f64::INFINITY, true, "College level"),
];

impl GradeTable {
    pub const ALL: [GradeTable; 2] = [GradeTable::Decimal, GradeTable::Whole];

    fn bands(self) -> &'static [Band] {
        match self {
            GradeTable::Decimal => DECIMAL_BANDS,
            GradeTable::Whole => WHOLE_BANDS,
        }
    }

    pub fn grade(self, score: f64) -> GradeLevel {
        let bands = self.bands();
        let rank = bands
            .iter()
            .position(|band| {
                if band.inclusive {
                    score <= band.upper
                } else {
                    score < band.upper
                }
            })
            .unwrap_or(bands.len() - 1);
        GradeLevel {
            table: self,
            rank: rank as u8,
        }
    }

    pub fn lowest(self) -> GradeLevel {
        GradeLevel {
            table: self,
            rank: 0,
        }
    }

    pub fn labels(self) -> impl Iterator<Item = &'static str> {
        self.bands().iter().map(|band| band.label)
    }

    pub fn name(self) -> &'static str {
        match self {
            GradeTable::Decimal => "decimal",
            GradeTable::Whole => "whole",
        }
    }
}

impl fmt::Display for GradeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GradeTable {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        GradeTable::ALL
            .into_iter()
            .find(|table| table.name().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown grade table {value:?} (expected decimal or whole)"))
    }
}

/// A bucket of one grade table. Labels are unique across tables, so the label alone
/// identifies the level when read back from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GradeLevel {
    table: GradeTable,
    rank: u8,
}

impl GradeLevel {
    pub fn table(&self) -> GradeTable {
        self.table
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    pub fn is_lowest(&self) -> bool {
        self.rank == 0
    }

    pub fn label(&self) -> &'static str {
        self.table.bands()[self.rank as usize].label
    }

    pub fn from_label(label: &str) -> Option<Self> {
        GradeTable::ALL.into_iter().find_map(|table| {
            table
                .labels()
                .position(|candidate| candidate == label)
                .map(|rank| GradeLevel {
                    table,
                    rank: rank as u8,
                })
        })
    }
}

impl fmt::Display for GradeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<GradeLevel> for String {
    fn from(value: GradeLevel) -> Self {
        value.label().to_string()
    }
}

impl TryFrom<String> for GradeLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GradeLevel::from_label(&value).ok_or_else(|| format!("unknown grade level {value:?}"))
    }
}

/// A score and the bucket it falls into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Readability {
    pub score: f64,
    pub grade: GradeLevel,
}

impl Readability {
    /// The result for text with nothing scorable in it.
    pub fn empty(table: GradeTable) -> Self {
        Self {
            score: 0.0,
            grade: table.lowest(),
        }
    }
}

impl fmt::Display for Readability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} ({})", self.score, self.grade)
    }
}

#[derive(Clone)]
pub struct ReadabilityScorer {
    analyzer: Arc<dyn TextAnalyzer>,
    table: GradeTable,
}

impl ReadabilityScorer {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>, table: GradeTable) -> Self {
        Self { analyzer, table }
    }

    pub fn with_lexicon(lexicon: Lexicon, table: GradeTable) -> Self {
        Self::new(Arc::new(LexiconAnalyzer::new(lexicon)), table)
    }

    pub fn table(&self) -> GradeTable {
        self.table
    }

    /// Scores non-empty, already filtered text.
    pub fn score(&self, text: &str) -> Readability {
        self.analyze(text).1
    }

    pub fn analyze(&self, text: &str) -> (TextStats, Readability) {
        let stats = self.analyzer.tokenize_and_score(text);
        let readability = self.rate(dale_chall(&stats));
        (stats, readability)
    }

    /// Buckets an already computed score, rounding it to two decimals.
    pub fn rate(&self, score: f64) -> Readability {
        let score = round2(score);
        Readability {
            score,
            grade: self.table.grade(score),
        }
    }

    pub fn empty(&self) -> Readability {
        Readability::empty(self.table)
    }
}

pub fn dale_chall(stats: &TextStats) -> f64 {
    if stats.words == 0 {
        return 0.0;
    }
    let difficult_pct = stats.difficult_words as f64 * 100.0 / stats.words as f64;
    let mut score = DIFFICULT_WEIGHT * difficult_pct + SENTENCE_WEIGHT * stats.words_per_sentence();
    if difficult_pct > DIFFICULT_THRESHOLD_PCT {
        score += DIFFICULT_ADJUSTMENT;
    }
    round2(score)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAnalyzer(TextStats);

    impl TextAnalyzer for FixedAnalyzer {
        fn tokenize_and_score(&self, _text: &str) -> TextStats {
            self.0
        }
    }

    fn stats(words: usize, sentences: usize, difficult_words: usize) -> TextStats {
        TextStats {
            words,
            sentences,
            difficult_words,
            syllables: 0,
        }
    }

    #[test]
    fn adjustment_applies_above_five_percent() {
        assert_eq!(dale_chall(&stats(10, 2, 1)), 5.46);
        assert_eq!(dale_chall(&stats(20, 1, 1)), 1.78);
        assert_eq!(dale_chall(&stats(4, 1, 0)), 0.2);
        assert_eq!(dale_chall(&stats(0, 0, 0)), 0.0);
    }

    #[test]
    fn decimal_table_uses_point_nine_boundaries() {
        let table = GradeTable::Decimal;
        assert_eq!(table.grade(0.0).label(), "4th Grade or below");
        assert_eq!(table.grade(4.9).label(), "4th Grade or below");
        assert_eq!(table.grade(4.95).label(), "5th - 6th Grade");
        assert_eq!(table.grade(8.9).label(), "11th - 12th Grade");
        assert_eq!(table.grade(9.0).label(), "College Level");
    }

    #[test]
    fn whole_table_uses_integer_boundaries() {
        let table = GradeTable::Whole;
        assert_eq!(table.grade(3.99).label(), "Kindergarten");
        assert_eq!(table.grade(4.0).label(), "1st to 3rd grade");
        assert_eq!(table.grade(9.9).label(), "6th to 8th grade");
        assert_eq!(table.grade(13.99).label(), "11th to 12th grade");
        assert_eq!(table.grade(14.0).label(), "College level");
        assert!(table.grade(-1.0).is_lowest());
    }

    #[test]
    fn labels_resolve_to_their_table() {
        for table in GradeTable::ALL {
            for (rank, label) in table.labels().enumerate() {
                let level = GradeLevel::from_label(label).expect("known label");
                assert_eq!(level.table(), table);
                assert_eq!(level.rank() as usize, rank);
            }
        }
        assert!(GradeLevel::from_label("Graduate school").is_none());
        assert_eq!("Whole".parse::<GradeTable>(), Ok(GradeTable::Whole));
        assert!("banded".parse::<GradeTable>().is_err());
    }

    #[test]
    fn scorer_rounds_and_buckets() {
        let scorer = ReadabilityScorer::new(
            Arc::new(FixedAnalyzer(stats(10, 2, 1))),
            GradeTable::Decimal,
        );
        let result = scorer.score("anything");
        assert_eq!(result.score, 5.46);
        assert_eq!(result.grade.label(), "5th - 6th Grade");
        assert_eq!(result.to_string(), "5.46 (5th - 6th Grade)");
    }

    #[test]
    fn analyzer_counts_fragments_as_one_sentence() {
        let analyzer = LexiconAnalyzer::new(Lexicon::embedded());
        let stats = analyzer.tokenize_and_score("the dog ran home");
        assert_eq!(stats.words, 4);
        assert_eq!(stats.sentences, 1);
        assert_eq!(stats.difficult_words, 0);

        let stats = analyzer.tokenize_and_score("The dog ran. The cat sat! Why?");
        assert_eq!(stats.sentences, 3);
        assert_eq!(stats.words, 7);
    }

    #[test]
    fn analyzer_flags_unfamiliar_words() {
        let analyzer = LexiconAnalyzer::new(Lexicon::embedded());
        let stats = analyzer.tokenize_and_score("the algorithm is complicated");
        assert_eq!(stats.words, 4);
        assert_eq!(stats.difficult_words, 2);
        assert_eq!(stats.difficult_ratio(), 0.5);
    }

    #[test]
    fn syllables_follow_vowel_groups() {
        assert_eq!(count_syllables("dog"), 1);
        assert_eq!(count_syllables("table"), 2);
        assert_eq!(count_syllables("home"), 1);
        assert_eq!(count_syllables("readability"), 5);
        assert_eq!(count_syllables("hmm"), 1);
    }
}
