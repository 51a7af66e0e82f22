//! Accumulator configuration and commit options.
use crate::error::ConfigError;
use serde::de::Error;
use std::num::NonZeroUsize;

/// Most write operations the database accepts in one atomic batch.
pub const MAX_BATCH_OPERATIONS: usize = 500;

/// Accumulator configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Operations staged into one batch before rolling over to a new one
    #[serde(default = "Config::default_batch_capacity")]
    pub batch_capacity: usize,

    /// Batches committed concurrently per group by `commit_with_default`
    #[serde(default)]
    pub commit_unit: Option<usize>,
}

impl Config {
    const fn default_batch_capacity() -> usize {
        MAX_BATCH_OPERATIONS
    }

    pub fn with_batch_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "Batch capacity must be greater than zero");
        assert!(
            capacity <= MAX_BATCH_OPERATIONS,
            "Batch capacity must not exceed {MAX_BATCH_OPERATIONS} writes"
        );

        self.batch_capacity = capacity;
        self
    }

    pub fn with_commit_unit(mut self, unit: usize) -> Self {
        self.commit_unit = Some(unit);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.batch_capacity > MAX_BATCH_OPERATIONS {
            return Err(ConfigError::CapacityAboveLimit {
                capacity: self.batch_capacity,
                max: MAX_BATCH_OPERATIONS,
            });
        }
        Ok(())
    }

    /// Options for `commit_with_default`.
    pub fn commit_options(&self) -> CommitOptions {
        match self.commit_unit {
            Some(unit) => CommitOptions::with_commit_unit(unit),
            None => CommitOptions::all(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_capacity: Self::default_batch_capacity(),
            commit_unit: None,
        }
    }
}

/// How many batches `commit` sends to the database at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    commit_unit: Option<NonZeroUsize>,
}

impl CommitOptions {
    /// Commit every batch concurrently as a single group.
    pub fn all() -> Self {
        Self { commit_unit: None }
    }

    /// Commit at most `unit` batches concurrently, group after group.
    /// A unit of zero means no limit.
    pub fn with_commit_unit(unit: usize) -> Self {
        Self {
            commit_unit: NonZeroUsize::new(unit),
        }
    }

    pub fn commit_unit(&self) -> Option<NonZeroUsize> {
        self.commit_unit
    }

    /// Number of groups needed to commit `batches` batches.
    pub fn group_count(&self, batches: usize) -> usize {
        match self.commit_unit {
            Some(unit) => batches.div_ceil(unit.get()),
            None => usize::from(batches > 0),
        }
    }
}
