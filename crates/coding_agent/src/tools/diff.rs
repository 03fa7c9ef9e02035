//! Unified diff previews for file-changing tools.

use similar::TextDiff;

const CONTEXT_LINES: usize = 3;

/// What a `write_file` or `edit_file` call would change, computed before
/// anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPreview {
    /// Path relative to the working root.
    pub path: String,
    /// The file does not exist yet.
    pub creates: bool,
    pub diff: String,
}

impl EditPreview {
    pub fn new(path: impl Into<String>, before: Option<&str>, after: &str) -> Self {
        let path = path.into();
        let diff = unified_diff(&path, before, after);
        Self {
            path,
            creates: before.is_none(),
            diff,
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.diff.contains("\n@@")
    }
}

/// Renders a unified diff with `--- a/path` / `+++ b/path` headers. A missing
/// `before` diffs against `/dev/null`.
pub fn unified_diff(path: &str, before: Option<&str>, after: &str) -> String {
    let old_header = match before {
        Some(_) => format!("a/{path}"),
        None => "/dev/null".to_string(),
    };
    let new_header = format!("b/{path}");

    let diff = TextDiff::from_lines(before.unwrap_or(""), after);
    let rendered = diff
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&old_header, &new_header)
        .to_string();
    if rendered.is_empty() {
        // `similar` omits the header when nothing changed.
        return format!("--- {old_header}\n+++ {new_header}\n");
    }
    rendered
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn changed_lines_are_marked_with_context() {
        let before = "one\ntwo\nthree\nfour\n";
        let after = "one\ntwo\n3\nfour\n";
        let diff = unified_diff("notes.txt", Some(before), after);

        assert!(diff.starts_with("--- a/notes.txt\n+++ b/notes.txt\n@@"), "{diff}");
        assert!(diff.contains("\n-three\n"), "{diff}");
        assert!(diff.contains("\n+3\n"), "{diff}");
        assert!(diff.contains("\n two\n"), "{diff}");
    }

    #[test]
    fn new_files_diff_against_dev_null() {
        let preview = EditPreview::new("src/new.rs", None, "fn main() {}\n");
        assert!(preview.creates);
        assert!(preview.diff.starts_with("--- /dev/null\n+++ b/src/new.rs\n"));
        assert!(preview.diff.contains("+fn main() {}"));
        assert!(!preview.is_noop());
    }

    #[test]
    fn identical_content_is_a_noop() {
        let preview = EditPreview::new("same.txt", Some("x\n"), "x\n");
        assert!(preview.is_noop());
        assert_eq!(preview.diff, "--- a/same.txt\n+++ b/same.txt\n");
    }
}
