pub mod init;
pub mod next;
pub mod run;
pub mod sessions;
pub mod status;

use anyhow::Context;
use cascade_core::{
    config::{Config, WarnLevel},
    driver::CascadeDriver,
    registry::SessionRegistry,
    store::ArtifactStore,
};
use std::path::{Path, PathBuf};

/// Global options every command needs to locate the project.
pub struct Project {
    pub root: PathBuf,
    pub artifacts_override: Option<PathBuf>,
}

pub struct Loaded {
    pub config: Config,
    pub driver: CascadeDriver,
}

impl Project {
    pub fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(&self.root).context("failed to load config")?;
        if let Some(dir) = &self.artifacts_override {
            config.artifacts_dir = dir.clone();
        }
        for w in config.validate() {
            match w.level {
                WarnLevel::Warning => tracing::debug!("config: {}", w.message),
                WarnLevel::Error => tracing::warn!("config: {}", w.message),
            }
        }
        Ok(config)
    }

    pub fn artifacts_dir(&self, config: &Config) -> PathBuf {
        config.artifacts_path(&self.root)
    }

    /// Load the config, the session registry and the dependency graph.
    pub fn load(&self) -> anyhow::Result<Loaded> {
        let config = self.config()?;
        let registry = SessionRegistry::builtin(config.extensions)
            .context("invalid session registry")?;
        let store = ArtifactStore::new(self.artifacts_dir(&config));
        let driver = CascadeDriver::new(registry, store)
            .context("invalid session graph")?
            .with_workers(config.status_workers);
        Ok(Loaded { config, driver })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
