//! Path sandboxing and limits for artifact registration.
//!
//! Every artifact path is interpreted relative to its project's root and
//! must resolve to a strict descendant of that root. Checks run:
//! - Lexically, at registration and at resolution
//! - Against the filesystem at resolution, so symlinks cannot leave the root
//! - Against a denylist of secret-looking paths
//! - Against a maximum artifact size

use std::io;
use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits applied when artifacts are registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPolicy {
    /// Maximum artifact size in bytes (default: 100MB)
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Glob patterns to reject (artifacts matching these are never registered)
    #[serde(default = "default_denylist")]
    pub denylist_patterns: Vec<String>,
}

fn default_max_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_denylist() -> Vec<String> {
    vec![
        "**/.env*".to_string(),
        "**/secrets*".to_string(),
        "**/*credential*".to_string(),
        "**/*.pem".to_string(),
        "**/*.key".to_string(),
        "**/.git/**".to_string(),
    ]
}

impl Default for ArtifactPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
            denylist_patterns: default_denylist(),
        }
    }
}

impl ArtifactPolicy {
    /// Check if a relative artifact path matches any denylist pattern
    pub fn is_denylisted(&self, path: &str) -> bool {
        let normalized = normalize_lexically(Path::new(path));
        let candidate = normalized.to_string_lossy();
        self.denylist_patterns
            .iter()
            .filter_map(|pattern| Pattern::new(pattern).ok())
            .any(|pattern| pattern.matches(path) || pattern.matches(&candidate))
    }

    /// Validate an artifact's path and size before it is stored
    pub fn validate(&self, file_path: &str, size_bytes: u64) -> Result<(), SafetyViolation> {
        if size_bytes > self.max_size_bytes {
            return Err(SafetyViolation::MaxSize {
                actual: size_bytes,
                limit: self.max_size_bytes,
            });
        }

        if self.is_denylisted(file_path) {
            return Err(SafetyViolation::DenylistMatch {
                path: file_path.to_string(),
            });
        }

        Ok(())
    }
}

/// Safety violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("Path escapes project root: {path} (root: {root})")]
    PathEscape { path: String, root: String },

    #[error("Path matches denylist pattern: {path}")]
    DenylistMatch { path: String },

    #[error("Maximum artifact size exceeded: {actual} > {limit}")]
    MaxSize { actual: u64, limit: u64 },

    #[error("Project root must be an absolute path: {root:?}")]
    RelativeRoot { root: String },
}

impl SafetyViolation {
    fn escape(path: &str, root: &Path) -> Self {
        Self::PathEscape {
            path: path.to_string(),
            root: root.display().to_string(),
        }
    }
}

/// Normalize `.` and `..` components without touching the filesystem.
///
/// `..` at the filesystem root stays at the root; leading `..` in a relative
/// path is preserved.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    normalized
}

/// Normalize a project root, refusing relative ones.
///
/// A relative root normalizes to a prefix (possibly empty) that every other
/// relative path starts with, so descendant checks against it mean nothing.
pub fn absolute_root(root: &Path) -> Result<PathBuf, SafetyViolation> {
    let normalized = normalize_lexically(root);
    if !normalized.is_absolute() {
        return Err(SafetyViolation::RelativeRoot {
            root: root.display().to_string(),
        });
    }
    Ok(normalized)
}

/// Resolve `relative` against `root`, rejecting anything that is not a
/// strict descendant of the root.
pub fn resolve_within_root(root: &Path, relative: &str) -> Result<PathBuf, SafetyViolation> {
    let root = absolute_root(root)?;
    let resolved = normalize_lexically(&root.join(relative));

    if resolved == root || !resolved.starts_with(&root) {
        return Err(SafetyViolation::escape(relative, &root));
    }

    Ok(resolved)
}

/// Re-check a lexically resolved path against the filesystem.
///
/// The deepest existing ancestor of `resolved` is canonicalized (following
/// symlinks) and must still sit under the canonical root. Paths that do not
/// exist yet are accepted as long as their existing prefix is inside.
pub fn verify_on_disk(root: &Path, resolved: &Path, original: &str) -> Result<(), SafetyViolation> {
    let root = absolute_root(root)?;
    let root = root.as_path();
    let canonical_root = match root.canonicalize() {
        Ok(path) => path,
        Err(err) if err.kind() == io::ErrorKind::NotFound => normalize_lexically(root),
        Err(_) => return Err(SafetyViolation::escape(original, root)),
    };

    let mut existing = resolved.to_path_buf();
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();
    while existing.symlink_metadata().is_err() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                remainder.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Ok(()),
        }
    }

    // A dangling symlink fails to canonicalize; treat it as hostile.
    let mut canonical = existing
        .canonicalize()
        .map_err(|_| SafetyViolation::escape(original, root))?;
    for part in remainder.into_iter().rev() {
        canonical.push(part);
    }

    if canonical == canonical_root || !canonical.starts_with(&canonical_root) {
        return Err(SafetyViolation::escape(original, root));
    }

    Ok(())
}
