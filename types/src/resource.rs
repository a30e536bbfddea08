//! Resource identifiers: canonical `file://` URIs keyed by absolute path.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

/// Canonical identifier of a source file, as a `file://` URI string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Resolve a tool-reported path against `root` (when relative) and
    /// convert the lexically normalized result to a file URI.
    pub fn resolve(path: &str, root: &Path) -> Result<Self, PathToUriError> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        Self::from_path(&normalize_path(&joined))
    }

    pub fn from_path(path: &Path) -> Result<Self, PathToUriError> {
        url::Url::from_file_path(path)
            .map(|url| Self(url.to_string()))
            .map_err(|()| PathToUriError {
                path: path.to_path_buf(),
            })
    }

    /// Wrap an identifier received over the wire without re-validating it.
    #[must_use]
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn to_path(&self) -> Option<PathBuf> {
        url::Url::parse(&self.0)
            .ok()
            .and_then(|u| u.to_file_path().ok())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}
