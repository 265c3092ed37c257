//! File-backed artifact store.
//!
//! The store answers two questions about a pattern, "does it exist" and "when
//! was it last modified", and is the only component that writes artifacts.
//! Writes go through a single writer lock; reads share it.

use crate::error::{CascadeError, Result};
use crate::io;
use crate::pattern::{ArtifactPattern, PatternKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub exists: bool,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Artifact {
    fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            last_modified: None,
        }
    }
}

#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a pattern's literal part.
    pub fn locate(&self, pattern: &ArtifactPattern) -> PathBuf {
        self.root.join(pattern.path())
    }

    pub fn exists(&self, pattern: &ArtifactPattern) -> Result<bool> {
        Ok(self.artifact(pattern)?.exists)
    }

    pub fn last_modified(&self, pattern: &ArtifactPattern) -> Result<Option<DateTime<Utc>>> {
        Ok(self.artifact(pattern)?.last_modified)
    }

    /// Look up the artifact a pattern refers to.
    ///
    /// A directory (declared with a trailing slash, or a literal path that is a
    /// directory on disk) exists when it has at least one entry, and its
    /// modification time is the newest of its immediate entries. A glob exists
    /// when at least one file matches, with the newest match as its time.
    pub fn artifact(&self, pattern: &ArtifactPattern) -> Result<Artifact> {
        let _guard = self.read_guard();
        let label = pattern.to_string();
        let full = self.locate(pattern);
        match pattern.kind() {
            PatternKind::File => match std::fs::metadata(&full) {
                Ok(meta) if meta.is_dir() => dir_artifact(&full, label),
                Ok(meta) => Ok(Artifact {
                    path: label,
                    exists: true,
                    last_modified: meta.modified().ok().map(to_utc),
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Artifact::missing(label)),
                Err(e) => Err(e.into()),
            },
            PatternKind::Directory => dir_artifact(&full, label),
            PatternKind::Glob => self.glob_artifact(pattern, label),
        }
    }

    fn glob_artifact(&self, pattern: &ArtifactPattern, label: String) -> Result<Artifact> {
        let prefix = pattern.literal_prefix();
        let base = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&prefix)
        };
        if !base.is_dir() {
            return Ok(Artifact::missing(label));
        }

        let mut found = false;
        let mut newest: Option<SystemTime> = None;
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if !pattern.matches_path(&io::slash_path(rel)) {
                continue;
            }
            found = true;
            if let Some(t) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
                newest = Some(newest.map_or(t, |n| n.max(t)));
            }
        }

        Ok(Artifact {
            path: label,
            exists: found,
            last_modified: if found { newest.map(to_utc) } else { None },
        })
    }

    /// Write a single file artifact, creating parent directories. The write is
    /// durable before this returns.
    pub fn write(&self, path: &str, content: &[u8]) -> Result<Artifact> {
        let pattern = ArtifactPattern::parse(path)?;
        if pattern.kind() != PatternKind::File {
            return Err(CascadeError::InvalidPattern {
                pattern: path.to_string(),
                reason: "writes must target a single file".to_string(),
            });
        }
        {
            let _guard = self.write_guard();
            io::atomic_write(&self.locate(&pattern), content)?;
        }
        debug!(path = %pattern, bytes = content.len(), "artifact written");
        self.artifact(&pattern)
    }

    /// Copy every staged file that belongs to one of `outputs` into the store.
    ///
    /// Files the executor left in the staging area that no output pattern
    /// claims are not promoted; a session may only write what it owns.
    /// Returns the promoted paths, relative to the store root.
    ///
    /// All-or-nothing: every file is first written to a temp file next to its
    /// target, and only then are they renamed into place. If a rename fails,
    /// the files already replaced get their previous content back.
    pub fn promote(&self, staging: &Path, outputs: &[ArtifactPattern]) -> Result<Vec<String>> {
        let staged = io::files_under(staging)?;
        let _guard = self.write_guard();

        let mut claimed = Vec::new();
        for rel in staged {
            let rel_str = io::slash_path(&rel);
            if !outputs.iter().any(|o| o.matches_path(&rel_str)) {
                warn!(path = %rel_str, "staged file is not a declared output, skipping");
                continue;
            }
            let target = self.root.join(&rel);
            if target.is_dir() {
                return Err(std::io::Error::other(format!(
                    "cannot promote {rel_str}: target is a directory"
                ))
                .into());
            }
            claimed.push((rel, rel_str, target));
        }

        let mut pending = Vec::with_capacity(claimed.len());
        for (rel, rel_str, target) in claimed {
            let data = std::fs::read(staging.join(&rel))?;
            let previous = match std::fs::read(&target) {
                Ok(old) => Some(old),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            let tmp = io::prepare_write(&target, &data)?;
            pending.push(Pending {
                rel: rel_str,
                target,
                previous,
                tmp,
            });
        }

        let mut done: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::with_capacity(pending.len());
        let mut promoted = Vec::with_capacity(pending.len());
        for p in pending {
            if let Err(e) = p.tmp.persist(&p.target) {
                rollback(done);
                return Err(e.error.into());
            }
            done.push((p.target, p.previous));
            promoted.push(p.rel);
        }
        debug!(count = promoted.len(), "staged artifacts promoted");
        Ok(promoted)
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// A staged file written next to its target, waiting to be renamed in.
struct Pending {
    rel: String,
    target: PathBuf,
    previous: Option<Vec<u8>>,
    tmp: NamedTempFile,
}

/// Undo a partial promotion, newest first.
fn rollback(done: Vec<(PathBuf, Option<Vec<u8>>)>) {
    for (target, previous) in done.into_iter().rev() {
        let restored = match previous {
            Some(data) => io::atomic_write(&target, &data),
            None => std::fs::remove_file(&target).map_err(Into::into),
        };
        if let Err(e) = restored {
            warn!(path = %target.display(), error = %e, "failed to roll back promoted artifact");
        }
    }
}

fn dir_artifact(dir: &Path, label: String) -> Result<Artifact> {
    if !dir.is_dir() {
        return Ok(Artifact::missing(label));
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Artifact::missing(label)),
        Err(e) => return Err(e.into()),
    };

    let mut count = 0usize;
    let mut newest: Option<SystemTime> = None;
    for entry in entries {
        let entry = entry?;
        count += 1;
        if let Some(t) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
            newest = Some(newest.map_or(t, |n| n.max(t)));
        }
    }

    if count == 0 {
        return Ok(Artifact::missing(label));
    }
    Ok(Artifact {
        path: label,
        exists: true,
        last_modified: newest.map(to_utc),
    })
}

fn to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}
