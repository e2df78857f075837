use std::fmt;

use crate::Lexicon;

/// Drops tokens that are not valid words of the target language.
///
/// Text is split on whitespace only; punctuation stays attached to its token, so
/// `"dog."` is judged as written.
#[derive(Clone, Default)]
pub struct WordValidityFilter {
    lexicon: Lexicon,
}

impl WordValidityFilter {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    pub fn filter(&self, text: &str) -> FilteredText {
        let kept: Vec<&str> = text
            .split_whitespace()
            .filter(|token| self.lexicon.is_valid(token))
            .collect();
        FilteredText(kept.join(" "))
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }
}

/// The valid-word subsequence of a message, joined by single spaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilteredText(String);

impl FilteredText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.0.split_whitespace().count()
    }

    /// The text to hand to the scorer, or `None` when nothing survived filtering.
    pub fn scorable(&self) -> Option<&str> {
        if self.0.is_empty() {
            None
        } else {
            Some(&self.0)
        }
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FilteredText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> WordValidityFilter {
        WordValidityFilter::new(Lexicon::from_words(["the", "cat", "sat", "on", "mat"]).unwrap())
    }

    #[test]
    fn keeps_valid_tokens_in_order() {
        let filtered = filter().filter("the  qqq cat\tsat zzz on the mat");
        assert_eq!(filtered.as_str(), "the cat sat on the mat");
        assert_eq!(filtered.word_count(), 6);
    }

    #[test]
    fn trailing_punctuation_makes_a_token_invalid() {
        let filtered = filter().filter("the cat sat on the mat.");
        assert_eq!(filtered.as_str(), "the cat sat on the");
    }

    #[test]
    fn invalid_only_text_is_not_scorable() {
        let filtered = filter().filter("asdf qwer!!");
        assert!(filtered.is_empty());
        assert_eq!(filtered.scorable(), None);
        assert!(filter().filter("   ").scorable().is_none());
    }

    #[test]
    fn filtering_twice_changes_nothing() {
        let once = filter().filter("The cat, the CAT sat");
        let twice = filter().filter(once.as_str());
        assert_eq!(once, twice);
        assert_eq!(once.as_str(), "The the CAT sat");
    }
}
