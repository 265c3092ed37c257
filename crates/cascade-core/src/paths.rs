use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CASCADE_DIR: &str = ".cascade";
pub const CONFIG_FILE: &str = ".cascade/config.yaml";

/// Artifact directory used when the config does not name one.
pub const DEFAULT_ARTIFACTS_DIR: &str = "planning";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn cascade_dir(root: &Path) -> PathBuf {
    root.join(CASCADE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve the artifact directory. Relative paths are taken from the project
/// root; absolute paths are used as they are.
pub fn artifacts_dir(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_lives_under_cascade_dir() {
        let root = Path::new("/proj");
        assert_eq!(config_path(root), PathBuf::from("/proj/.cascade/config.yaml"));
        assert!(config_path(root).starts_with(cascade_dir(root)));
    }

    #[test]
    fn artifacts_dir_is_root_relative_unless_absolute() {
        let root = Path::new("/proj");
        assert_eq!(
            artifacts_dir(root, Path::new("planning")),
            PathBuf::from("/proj/planning")
        );
        assert_eq!(
            artifacts_dir(root, Path::new("/elsewhere/docs")),
            PathBuf::from("/elsewhere/docs")
        );
    }
}
