use std::collections::BTreeSet;
use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "src/data.rs"]
#[allow(dead_code)]
mod data_model;
use data_model::{build_set_bytes, parse_word_list};

const FAMILIAR_WORDS: &str = "data/familiar_words.txt";
const DICTIONARY_WORDS: &str = "data/dictionary.txt";

fn main() -> Result<(), Box<dyn Error>> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    let familiar = load_words(&manifest_dir, FAMILIAR_WORDS)?;
    let mut dictionary = load_words(&manifest_dir, DICTIONARY_WORDS)?;
    // Every familiar word is also a valid word.
    dictionary.extend(familiar.iter().cloned());

    write_set(&familiar, &out_dir, "familiar.fst", "CHATLENS_FAMILIAR_FST")?;
    write_set(
        &dictionary,
        &out_dir,
        "dictionary.fst",
        "CHATLENS_DICTIONARY_FST",
    )?;
    Ok(())
}

fn load_words(manifest_dir: &Path, relative: &str) -> Result<BTreeSet<String>, Box<dyn Error>> {
    let path = manifest_dir.join(relative);
    println!("cargo:rerun-if-changed={}", path.display());
    if !path.exists() {
        panic!("Missing word list {}", path.display());
    }
    let text = fs::read_to_string(&path)?;
    let words = parse_word_list(&text);
    if words.is_empty() {
        return Err(format!("Word list {} is empty", path.display()).into());
    }
    Ok(words)
}

fn write_set(
    words: &BTreeSet<String>,
    out_dir: &Path,
    file_name: &str,
    env_key: &str,
) -> Result<(), Box<dyn Error>> {
    let bytes = build_set_bytes(words)?;
    let fst_path = out_dir.join(file_name);
    fs::write(&fst_path, bytes)?;
    println!("cargo:rustc-env={env_key}={}", fst_path.display());
    Ok(())
}
