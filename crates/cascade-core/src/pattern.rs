//! Artifact path patterns.
//!
//! A pattern is a path relative to the artifact root in one of three shapes:
//!
//! - a single file: `journey.md`
//! - a directory treated as one artifact: `backlog/` (trailing slash)
//! - a glob over files: `backlog/*.md`
//!
//! Patterns are how sessions declare what they read and write; the graph
//! builder derives edges from pattern overlap.

use crate::error::{CascadeError, Result};
use globset::{GlobBuilder, GlobMatcher};
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

const GLOB_META: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    File,
    Directory,
    Glob,
}

#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    /// Normalised path, forward slashes, no trailing slash.
    path: String,
    kind: PatternKind,
    matcher: Option<GlobMatcher>,
}

impl ArtifactPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| CascadeError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut s = raw.trim().replace('\\', "/");
        while let Some(rest) = s.strip_prefix("./") {
            s = rest.to_string();
        }
        if s.starts_with('/') {
            return Err(invalid("must be relative to the artifact root"));
        }
        let is_dir = s.ends_with('/');
        let path = s.trim_end_matches('/').to_string();
        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        if path.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
            return Err(invalid("path components must be non-empty and may not be '.' or '..'"));
        }

        if path.contains(GLOB_META) {
            if is_dir {
                return Err(invalid("a glob cannot also be a directory artifact"));
            }
            let glob = GlobBuilder::new(&path)
                .literal_separator(true)
                .build()
                .map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self {
                path,
                kind: PatternKind::Glob,
                matcher: Some(glob.compile_matcher()),
            });
        }

        Ok(Self {
            path,
            kind: if is_dir {
                PatternKind::Directory
            } else {
                PatternKind::File
            },
            matcher: None,
        })
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// The normalised path, without a trailing slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_glob(&self) -> bool {
        self.kind == PatternKind::Glob
    }

    /// Match a concrete relative path (forward slashes) against this pattern.
    pub fn matches_path(&self, candidate: &str) -> bool {
        let candidate = candidate.trim_end_matches('/');
        match self.kind {
            PatternKind::File => self.path == candidate,
            PatternKind::Directory => {
                self.path == candidate || is_under(candidate, &self.path)
            }
            PatternKind::Glob => self
                .matcher
                .as_ref()
                .map(|m| m.is_match(candidate))
                .unwrap_or(false),
        }
    }

    /// The leading components that contain no glob metacharacters.
    pub fn literal_prefix(&self) -> String {
        self.path
            .split('/')
            .take_while(|c| !c.contains(GLOB_META))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// True when an artifact written under `self` could satisfy `other` (or
    /// the other way round). Edges between sessions come from this relation.
    pub fn overlaps(&self, other: &ArtifactPattern) -> bool {
        use PatternKind::*;
        if self.path == other.path {
            return true;
        }
        match (self.kind, other.kind) {
            (File, File) => false,
            (Directory, _) => dir_overlaps(&self.path, other),
            (_, Directory) => dir_overlaps(&other.path, self),
            (Glob, File) => self.matches_path(&other.path),
            (File, Glob) => other.matches_path(&self.path),
            (Glob, Glob) => self.matches_path(&other.path) || other.matches_path(&self.path),
        }
    }
}

fn dir_overlaps(dir: &str, other: &ArtifactPattern) -> bool {
    match other.kind {
        PatternKind::Glob => {
            let prefix = other.literal_prefix();
            prefix == dir || is_under(&prefix, dir) || other.matches_path(dir)
        }
        _ => is_under(&other.path, dir) || is_under(dir, &other.path),
    }
}

fn is_under(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

impl fmt::Display for ArtifactPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PatternKind::Directory => write!(f, "{}/", self.path),
            _ => f.write_str(&self.path),
        }
    }
}

impl PartialEq for ArtifactPattern {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.kind == other.kind
    }
}

impl Eq for ArtifactPattern {}

impl Hash for ArtifactPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl Serialize for ArtifactPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
