use std::collections::BTreeSet;

use fst::SetBuilder;

/// Parses a word-list file into its normalized, sorted, de-duplicated entries.
///
/// Entries are whitespace separated; `#` starts a comment that runs to the end of the line.
pub fn parse_word_list(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .flat_map(str::split_whitespace)
        .map(normalize_word)
        .filter(|word| !word.is_empty())
        .collect()
}

/// Case-folds a token for lookups. Surrounding punctuation is preserved.
pub fn normalize_word(word: &str) -> String {
    word.to_lowercase()
}

/// Builds the bytes of an `fst::Set` from sorted entries.
pub fn build_set_bytes<'a, I>(words: I) -> Result<Vec<u8>, fst::Error>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut builder = SetBuilder::memory();
    for word in words {
        builder.insert(word)?;
    }
    builder.into_inner()
}
