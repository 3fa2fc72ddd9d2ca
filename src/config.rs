//! Configuration options for the TomeDb storage engine.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration options for opening a database file.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database file if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Size of a storage block in bytes. Persisted in the file's metadata
    /// block on creation; re-opening with a different value is an error.
    /// Default: 4KB
    pub block_size: usize,

    /// Maximum number of keys per index node before it splits.
    /// Default: 32
    pub index_order: usize,

    /// Number of trailing chain blocks a shrinking record update may keep
    /// around for future growth instead of freeing immediately.
    /// Default: 0 (release every unused block)
    pub update_slack_blocks: usize,

    /// Maximum attempts for an operation hitting a sharing/lock violation
    /// on the backing file.
    /// Default: 10
    pub retry_attempts: usize,

    /// Pause between lock-contention retry attempts.
    /// Default: 20ms
    pub retry_delay: Duration,

    /// Sync file contents to disk after every block write.
    /// Enabling trades write throughput for durability.
    /// Default: false
    pub sync_writes: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            block_size: 4 * 1024, // 4KB
            index_order: 32,
            update_slack_blocks: 0,
            retry_attempts: 10,
            retry_delay: Duration::from_millis(20),
            sync_writes: false,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database file if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the storage block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the maximum number of keys per index node.
    pub fn index_order(mut self, order: usize) -> Self {
        self.index_order = order;
        self
    }

    /// Sets how many trailing blocks a shrinking update may keep.
    pub fn update_slack_blocks(mut self, blocks: usize) -> Self {
        self.update_slack_blocks = blocks;
        self
    }

    /// Sets the lock-contention retry budget.
    pub fn retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the pause between lock-contention retries.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enables or disables per-write syncing.
    pub fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Returns the retry policy derived from these options.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { attempts: self.retry_attempts, delay: self.retry_delay }
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.block_size < 128 {
            return Err(crate::Error::invalid_argument("block_size must be >= 128"));
        }
        if self.block_size > u32::MAX as usize {
            return Err(crate::Error::invalid_argument("block_size must fit in 32 bits"));
        }
        if self.index_order < 4 {
            return Err(crate::Error::invalid_argument("index_order must be >= 4"));
        }
        if self.retry_attempts == 0 {
            return Err(crate::Error::invalid_argument("retry_attempts must be > 0"));
        }
        Ok(())
    }
}
