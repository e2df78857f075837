//! TOML configuration. Every key is optional; a missing file section falls back to
//! the defaults below.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Lexicon;
use crate::aggregator::AggregatorOptions;
use crate::cache::CachePolicy;
use crate::error::{Error, Result};
use crate::metrics::RepeatedAway;
use crate::readability::GradeTable;
use crate::report::{FlushPolicy, Sink};

fn default_every_messages() -> u64 {
    50
}

fn default_every_secs() -> u64 {
    3600
}

fn default_tick_secs() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("chatlens-data")
}

fn default_cache_file() -> PathBuf {
    PathBuf::from("scores_cache.json")
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub scoring: ScoringConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Count,
    Interval,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_every_messages")]
    pub every_messages: u64,
    #[serde(default = "default_every_secs")]
    pub every_secs: u64,
    /// How often the service checks the interval policy.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default)]
    pub sink: Sink,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            every_messages: default_every_messages(),
            every_secs: default_every_secs(),
            tick_secs: default_tick_secs(),
            sink: Sink::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    pub grade_table: GradeTable,
    pub cache_policy: CachePolicy,
    pub repeated_away: RepeatedAway,
    /// Word file replacing the embedded dictionary.
    pub dictionary: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Relative paths resolve against `data_dir`.
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
    #[serde(default)]
    pub message_log: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_file: default_cache_file(),
            message_log: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::Storage {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if scheduler.policy == PolicyKind::Count && scheduler.every_messages == 0 {
            return Err(Error::Config("scheduler.every_messages must be positive".into()));
        }
        if scheduler.policy == PolicyKind::Interval && scheduler.every_secs == 0 {
            return Err(Error::Config("scheduler.every_secs must be positive".into()));
        }
        if scheduler.tick_secs == 0 {
            return Err(Error::Config("scheduler.tick_secs must be positive".into()));
        }
        if self.storage.cache_file.as_os_str().is_empty() {
            return Err(Error::Config("storage.cache_file must not be empty".into()));
        }
        Ok(())
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        match self.scheduler.policy {
            PolicyKind::Count => FlushPolicy::Count {
                every: self.scheduler.every_messages,
            },
            PolicyKind::Interval => FlushPolicy::Interval {
                every_secs: self.scheduler.every_secs,
            },
            PolicyKind::Manual => FlushPolicy::Manual,
        }
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            grade_table: self.scoring.grade_table,
            cache_policy: self.scoring.cache_policy,
            repeated_away: self.scoring.repeated_away,
            flush_policy: self.flush_policy(),
            periodic_sink: self.scheduler.sink,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_secs)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.cache_file)
    }

    pub fn message_log_path(&self) -> Option<PathBuf> {
        self.storage
            .message_log
            .as_ref()
            .map(|log| self.storage.data_dir.join(log))
    }

    /// Creates the data directory. Failure here is fatal.
    pub fn prepare_storage(&self) -> Result<()> {
        fs::create_dir_all(&self.storage.data_dir).map_err(|source| Error::Storage {
            path: self.storage.data_dir.clone(),
            source,
        })
    }

    pub fn lexicon(&self) -> Result<Lexicon> {
        match &self.scoring.dictionary {
            Some(path) => Lexicon::from_word_file(path),
            None => Ok(Lexicon::embedded()),
        }
    }
}
