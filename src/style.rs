//! ANSI styling and width helpers.

use unicode_width::UnicodeWidthChar;

const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Bold,
    Dim,
    Red,
    Green,
    Yellow,
    Cyan,
}

impl Style {
    fn code(self) -> &'static str {
        match self {
            Self::Bold => "\x1b[1m",
            Self::Dim => "\x1b[2m",
            Self::Red => "\x1b[31m",
            Self::Green => "\x1b[32m",
            Self::Yellow => "\x1b[33m",
            Self::Cyan => "\x1b[36m",
        }
    }
}

/// Wraps `text` in the style's escape codes when `enabled`.
#[must_use]
pub fn paint(text: &str, style: Style, enabled: bool) -> String {
    if !enabled || text.is_empty() {
        return text.to_string();
    }
    format!("{}{text}{RESET}", style.code())
}

/// Display width of `text`, ignoring ANSI CSI sequences.
#[must_use]
pub fn visible_width(text: &str) -> usize {
    let mut width = 0;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if ('@'..='~').contains(&next) {
                    break;
                }
            }
            continue;
        }
        width += ch.width().unwrap_or(0);
    }
    width
}

/// Clips plain `text` to at most `max_width` columns, marking the cut with `…`.
#[must_use]
pub fn clip_to_width(text: &str, max_width: usize) -> String {
    if visible_width(text) <= max_width {
        return text.to_string();
    }
    if max_width == 0 {
        return String::new();
    }

    let budget = max_width - 1;
    let mut used = 0;
    let mut clipped = String::new();
    for ch in text.chars() {
        let width = ch.width().unwrap_or(0);
        if used + width > budget {
            break;
        }
        used += width;
        clipped.push(ch);
    }
    clipped.push('…');
    clipped
}
