//! Hot-reloadable configuration.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;

use super::loader::{ConfigError, ConfigLoader};
use crate::domain::models::Config;

/// Shared, swappable configuration.
///
/// Readers take an `Arc<Config>` snapshot and keep it for the work they are
/// doing; a reload only affects snapshots taken afterwards.
#[derive(Clone)]
pub struct ConfigHandle {
    sender: Arc<watch::Sender<Arc<Config>>>,
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::from_validated(Config::default())
    }
}

impl ConfigHandle {
    /// Validate `config` and wrap it.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        ConfigLoader::validate(&config)?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: Config) -> Self {
        let (sender, _) = watch::channel(Arc::new(config));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current configuration.
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.sender.borrow())
    }

    /// Swap in `config` if it validates. The old value stays in effect on error.
    pub fn replace(&self, config: Config) -> Result<(), ConfigError> {
        ConfigLoader::validate(&config)?;
        self.sender.send_replace(Arc::new(config));
        tracing::info!("configuration replaced");
        Ok(())
    }

    /// Reload from `path` (on top of the defaults) and swap it in.
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let config = ConfigLoader::load_from_file(path.as_ref())?;
        self.sender.send_replace(Arc::new(config));
        tracing::info!(path = %path.as_ref().display(), "configuration reloaded");
        Ok(())
    }

    /// Watch for replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_replace() {
        let handle = ConfigHandle::default();
        let before = handle.snapshot();

        let mut next = Config::default();
        next.convergence.max_iterations = 2;
        handle.replace(next).unwrap();

        assert_eq!(before.convergence.max_iterations, 8);
        assert_eq!(handle.snapshot().convergence.max_iterations, 2);
    }

    #[test]
    fn test_invalid_replacement_is_rejected() {
        let handle = ConfigHandle::default();
        let mut bad = Config::default();
        bad.convergence.max_iterations = 0;
        assert!(handle.replace(bad).is_err());
        assert_eq!(handle.snapshot().convergence.max_iterations, 8);
    }

    #[tokio::test]
    async fn test_subscribers_see_replacements() {
        let handle = ConfigHandle::default();
        let mut rx = handle.subscribe();
        let mut next = Config::default();
        next.dispatch.sweep_parallelism = 9;
        handle.replace(next).unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().dispatch.sweep_parallelism, 9);
    }
}
