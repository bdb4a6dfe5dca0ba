//! Store configuration.

/// Configuration for opening a [`crate::KvStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether every commit is synced to the medium rather than only flushed.
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether every commit is synced.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}
