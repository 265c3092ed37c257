use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::paths;
use crate::resolver::MAX_WORKERS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Shell command run once per session. `{session}` is replaced with the
    /// session id.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_timeout_seconds() -> u64 {
    1800
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            command: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl ExecutorConfig {
    /// `None` when no command is configured. A zero timeout disables the
    /// deadline.
    pub fn build(&self, working_dir: &Path) -> Result<Option<CommandExecutor>> {
        let Some(command) = self.command.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(None);
        };
        let timeout = (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds));
        CommandExecutor::new(&self.shell, command, working_dir, timeout).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Include the extension sessions that run after the core cascade.
    #[serde(default)]
    pub extensions: bool,
    #[serde(default = "default_status_workers")]
    pub status_workers: usize,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn default_version() -> u32 {
    1
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_ARTIFACTS_DIR)
}

fn default_status_workers() -> usize {
    crate::resolver::DEFAULT_WORKERS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            artifacts_dir: default_artifacts_dir(),
            extensions: false,
            status_workers: default_status_workers(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Config {
    /// Load `.cascade/config.yaml`, or the defaults when it does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn artifacts_path(&self, root: &Path) -> PathBuf {
        paths::artifacts_dir(root, &self.artifacts_dir)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != 1 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("unsupported config version {}", self.version),
            });
        }

        if self.status_workers == 0 || self.status_workers > MAX_WORKERS {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "status_workers = {} is outside 1..={MAX_WORKERS}; it will be clamped",
                    self.status_workers
                ),
            });
        }

        if self.artifacts_dir.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "artifacts_dir is empty".to_string(),
            });
        }

        match self.executor.command.as_deref() {
            None => warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "executor.command is not set; `cascade run` will refuse to start"
                    .to_string(),
            }),
            Some(c) if c.trim().is_empty() => warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "executor.command is empty".to_string(),
            }),
            Some(_) => {}
        }

        if self.executor.timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "executor.timeout_seconds is 0; sessions never time out".to_string(),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.artifacts_path(dir.path()), dir.path().join("planning"));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.extensions = true;
        cfg.executor.command = Some("generate {session}".to_string());
        cfg.save(dir.path()).unwrap();
        assert!(paths::config_path(dir.path()).exists());
        assert_eq!(Config::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(paths::cascade_dir(dir.path())).unwrap();
        std::fs::write(
            paths::config_path(dir.path()),
            "artifacts_dir: docs\nexecutor:\n  command: make {session}\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.artifacts_dir, PathBuf::from("docs"));
        assert_eq!(cfg.executor.shell, "sh");
        assert_eq!(cfg.executor.timeout_seconds, 1800);
        assert_eq!(cfg.status_workers, 4);
        assert!(!cfg.extensions);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(paths::cascade_dir(dir.path())).unwrap();
        std::fs::write(paths::config_path(dir.path()), "status_workers: [oops\n").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::default();
        cfg.status_workers = 0;
        cfg.executor.timeout_seconds = 0;
        let msgs: Vec<String> = cfg.validate().into_iter().map(|w| w.message).collect();
        assert!(msgs.iter().any(|m| m.contains("status_workers")));
        assert!(msgs.iter().any(|m| m.contains("timeout_seconds")));
        assert!(msgs.iter().any(|m| m.contains("executor.command")));

        cfg.status_workers = 2;
        cfg.executor.timeout_seconds = 60;
        cfg.executor.command = Some("true".to_string());
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn executor_is_built_only_with_a_command() {
        let dir = TempDir::new().unwrap();
        let mut cfg = ExecutorConfig::default();
        assert!(cfg.build(dir.path()).unwrap().is_none());
        cfg.command = Some("echo {session}".to_string());
        assert!(cfg.build(dir.path()).unwrap().is_some());
        cfg.shell = "no-such-shell-anywhere".to_string();
        assert!(cfg.build(dir.path()).unwrap_err().is_configuration());
    }
}
