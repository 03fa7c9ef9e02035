use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use super::diff::EditPreview;
use super::paths::WorkingRoot;
use crate::error::ToolError;

pub const DEFAULT_READ_MAX_BYTES: u64 = 200 * 1024;

pub fn read_file(root: &WorkingRoot, path: &str, max_bytes: u64) -> Result<String, ToolError> {
    let resolved = root.resolve_existing(path)?;
    let metadata = fs::metadata(&resolved).map_err(|error| ToolError::io("stat", &resolved, error))?;
    if metadata.is_dir() {
        return Err(ToolError::InvalidArguments(format!(
            "{} is a directory; use list_dir",
            root.display(&resolved)
        )));
    }
    if metadata.len() > max_bytes {
        return Err(ToolError::Io(format!(
            "file exceeds max read size ({} bytes > {max_bytes} bytes)",
            metadata.len()
        )));
    }

    let bytes = fs::read(&resolved).map_err(|error| ToolError::io("read", &resolved, error))?;
    String::from_utf8(bytes).map_err(|_| {
        ToolError::Io(format!(
            "{} is not valid UTF-8 text",
            root.display(&resolved)
        ))
    })
}

pub fn write_file(root: &WorkingRoot, path: &str, content: &str) -> Result<String, ToolError> {
    let resolved = root.resolve_write(path)?;
    if resolved.is_dir() {
        return Err(ToolError::InvalidArguments(format!(
            "{} is a directory",
            root.display(&resolved)
        )));
    }
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| ToolError::io("create parent directories for", &resolved, error))?;
    }

    write_atomically(&resolved, content.as_bytes())?;
    Ok(format!(
        "Wrote {} bytes to {}",
        content.len(),
        root.display(&resolved)
    ))
}

pub fn edit_file(
    root: &WorkingRoot,
    path: &str,
    old_text: &str,
    new_text: &str,
) -> Result<String, ToolError> {
    if old_text.is_empty() {
        return Err(ToolError::InvalidArguments(
            "old_text must not be empty".to_string(),
        ));
    }

    let resolved = root.resolve_existing(path)?;
    let current = fs::read_to_string(&resolved).map_err(|error| ToolError::io("read", &resolved, error))?;
    let updated = replace_once(&current, old_text, new_text)?;
    write_atomically(&resolved, updated.as_bytes())?;
    Ok(format!("Updated {}", root.display(&resolved)))
}

/// Diff of what [`write_file`] would do, without writing.
pub fn plan_write(root: &WorkingRoot, path: &str, content: &str) -> Result<EditPreview, ToolError> {
    let resolved = root.resolve_write(path)?;
    if resolved.is_dir() {
        return Err(ToolError::InvalidArguments(format!(
            "{} is a directory",
            root.display(&resolved)
        )));
    }
    let before = match fs::read_to_string(&resolved) {
        Ok(text) => Some(text),
        Err(error) if error.kind() == ErrorKind::NotFound => None,
        Err(error) => return Err(ToolError::io("read", &resolved, error)),
    };
    Ok(EditPreview::new(root.display(&resolved), before.as_deref(), content))
}

/// Diff of what [`edit_file`] would do, without writing.
pub fn plan_edit(
    root: &WorkingRoot,
    path: &str,
    old_text: &str,
    new_text: &str,
) -> Result<EditPreview, ToolError> {
    if old_text.is_empty() {
        return Err(ToolError::InvalidArguments(
            "old_text must not be empty".to_string(),
        ));
    }
    let resolved = root.resolve_existing(path)?;
    let current = fs::read_to_string(&resolved).map_err(|error| ToolError::io("read", &resolved, error))?;
    let updated = replace_once(&current, old_text, new_text)?;
    Ok(EditPreview::new(root.display(&resolved), Some(&current), &updated))
}

fn replace_once(current: &str, old_text: &str, new_text: &str) -> Result<String, ToolError> {
    let occurrences = current.match_indices(old_text).count();
    if occurrences != 1 {
        return Err(ToolError::InvalidArguments(format!(
            "edit_file requires exactly one match of old_text; found {occurrences}"
        )));
    }
    Ok(current.replacen(old_text, new_text, 1))
}

pub fn list_dir(root: &WorkingRoot, path: &str) -> Result<String, ToolError> {
    let resolved = root.resolve_existing(path)?;
    if !resolved.is_dir() {
        return Err(ToolError::InvalidArguments(format!(
            "{} is not a directory",
            root.display(&resolved)
        )));
    }

    let mut names = Vec::new();
    let entries = fs::read_dir(&resolved).map_err(|error| ToolError::io("list", &resolved, error))?;
    for entry in entries {
        let entry = entry.map_err(|error| ToolError::io("list", &resolved, error))?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    if names.is_empty() {
        return Ok(format!("{} is empty", root.display(&resolved)));
    }
    Ok(names.join("\n"))
}

/// Writes through a sibling temp file, fsyncs it and renames it over `target`.
/// Readers see either the old file or the complete new one.
fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), ToolError> {
    let directory = target.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(directory)
        .map_err(|error| ToolError::io("create temp file for", target, error))?;
    temp.write_all(bytes)
        .map_err(|error| ToolError::io("write temp file for", target, error))?;
    temp.as_file()
        .sync_all()
        .map_err(|error| ToolError::io("sync temp file for", target, error))?;

    if let Ok(existing) = fs::metadata(target) {
        let _ = fs::set_permissions(temp.path(), existing.permissions());
    }

    temp.persist(target)
        .map_err(|error| ToolError::io("replace", target, error.error))?;
    Ok(())
}
