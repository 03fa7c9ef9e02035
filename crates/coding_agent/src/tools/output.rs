/// Caps `content` at `max_chars` characters, keeping the head.
///
/// Returns the possibly shortened text and whether anything was cut.
pub fn truncate(content: String, max_chars: usize) -> (String, bool) {
    let Some((cutoff, _)) = content.char_indices().nth(max_chars) else {
        return (content, false);
    };

    let omitted = content[cutoff..].chars().count();
    let mut truncated = content[..cutoff].to_string();
    truncated.push_str(&format!("\n[truncated: {omitted} more characters]"));
    (truncated, true)
}

/// Joins captured process streams into one tool output block.
pub fn format_process_output(status: &str, stdout: &[u8], stderr: &[u8]) -> String {
    format!(
        "status: {status}\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(stdout),
        String::from_utf8_lossy(stderr)
    )
}
