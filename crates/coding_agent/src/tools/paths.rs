use std::path::{Component, Path, PathBuf};

use crate::error::ToolError;

/// Canonical directory every tool path must stay inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingRoot {
    root: PathBuf,
}

impl WorkingRoot {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let path = path.as_ref();
        let root = path
            .canonicalize()
            .map_err(|error| ToolError::io("resolve working root", path, error))?;
        if !root.is_dir() {
            return Err(ToolError::Io(format!(
                "working root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves a path that must already exist. Symlinks are followed and the
    /// target must still be inside the root.
    pub fn resolve_existing(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let candidate = self.lexical_candidate(raw)?;
        let canonical = candidate
            .canonicalize()
            .map_err(|error| ToolError::io("resolve", &candidate, error))?;
        self.ensure_inside(&canonical)?;
        Ok(canonical)
    }

    /// Resolves a path that may not exist yet. The deepest existing ancestor
    /// is canonicalized so a symlinked directory cannot redirect the write.
    pub fn resolve_write(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let candidate = self.lexical_candidate(raw)?;
        if candidate == self.root {
            return Err(ToolError::InvalidArguments(
                "path refers to the working root itself".to_string(),
            ));
        }

        let parent = candidate.parent().ok_or_else(|| {
            ToolError::InvalidArguments(format!("{} has no parent directory", candidate.display()))
        })?;
        let anchor = canonicalize_existing_ancestor(parent)?;
        self.ensure_inside(&anchor)?;
        Ok(candidate)
    }

    /// Root-relative rendering for tool output.
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    /// Joins relative input onto the root and folds `.`/`..` without touching
    /// the filesystem, rejecting anything that lands outside.
    fn lexical_candidate(&self, raw: &str) -> Result<PathBuf, ToolError> {
        if raw.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "path must not be empty".to_string(),
            ));
        }

        let input = Path::new(raw);
        let joined = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.root.join(input)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other.as_os_str()),
            }
        }

        if !normalized.starts_with(&self.root) {
            return Err(ToolError::PathEscape(raw.to_string()));
        }
        Ok(normalized)
    }

    fn ensure_inside(&self, canonical: &Path) -> Result<(), ToolError> {
        if canonical.starts_with(&self.root) {
            Ok(())
        } else {
            Err(ToolError::PathEscape(canonical.display().to_string()))
        }
    }
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, ToolError> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor
                .canonicalize()
                .map_err(|error| ToolError::io("resolve", ancestor, error));
        }
    }

    Err(ToolError::Io(format!(
        "no existing ancestor for {}",
        path.display()
    )))
}
