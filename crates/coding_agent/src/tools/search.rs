use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use agent_provider::{is_cancelled, CancelSignal};
use ignore::WalkBuilder;
use regex::Regex;

use super::paths::WorkingRoot;
use crate::error::ToolError;

pub const MAX_MATCHES: usize = 200;
const BINARY_SNIFF_BYTES: usize = 8 * 1024;
const SKIPPED_DIRS: &[&str] = &[".git", ".coding_agent"];

/// Regex search over text files under `path`, honoring `.gitignore`.
///
/// Output lines are `path:line: text`, paths relative to the root.
pub fn search(
    root: &WorkingRoot,
    pattern: &str,
    path: Option<&str>,
    cancel: &CancelSignal,
) -> Result<String, ToolError> {
    let regex = Regex::new(pattern)
        .map_err(|error| ToolError::InvalidArguments(format!("invalid regex: {error}")))?;
    let start = root.resolve_existing(path.unwrap_or("."))?;

    let mut builder = WalkBuilder::new(&start);
    builder
        .hidden(false)
        .follow_links(false)
        .require_git(false)
        .sort_by_file_name(|left, right| left.cmp(right))
        .filter_entry(|entry| {
            !entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name))
        });

    let mut matches = Vec::new();
    let mut limited = false;
    'walk: for entry in builder.build() {
        if is_cancelled(cancel) {
            break;
        }
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        let display = root.display(entry.path());
        let Some(lines) = text_lines(entry.path()) else {
            continue;
        };
        for (index, line) in lines.enumerate() {
            if regex.is_match(&line) {
                if matches.len() == MAX_MATCHES {
                    limited = true;
                    break 'walk;
                }
                matches.push(format!("{display}:{}: {}", index + 1, line.trim_end()));
            }
        }
    }

    if matches.is_empty() {
        return Ok(format!("no matches for /{pattern}/"));
    }
    let mut output = matches.join("\n");
    if limited {
        output.push_str(&format!("\n[stopped after {MAX_MATCHES} matches]"));
    }
    Ok(output)
}

/// Line iterator for a text file, or `None` when the file looks binary or
/// cannot be read.
fn text_lines(path: &Path) -> Option<impl Iterator<Item = String>> {
    let mut file = File::open(path).ok()?;
    let mut head = vec![0u8; BINARY_SNIFF_BYTES];
    let read = file.read(&mut head).ok()?;
    if head[..read].contains(&0) {
        return None;
    }

    let file = File::open(path).ok()?;
    Some(
        BufReader::new(file)
            .split(b'\n')
            .map_while(Result::ok)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
    )
}
