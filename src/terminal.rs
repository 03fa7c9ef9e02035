//! Terminal trait for line-oriented sessions.

use std::time::Duration;

/// Result of waiting for one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, without its trailing newline.
    Line(String),
    /// Input closed.
    Eof,
    /// Nothing arrived before the timeout.
    Pending,
}

/// Minimal terminal interface for a transcript console.
pub trait Terminal {
    /// Write output to the terminal. Output is flushed before returning.
    fn write(&mut self, data: &str);

    /// Waits up to `timeout` for the next input line.
    ///
    /// Callers poll in short slices so they can notice interrupts between
    /// polls.
    fn read_line(&mut self, timeout: Duration) -> LineRead;

    /// Whether stdout is attached to a TTY.
    fn is_interactive(&self) -> bool;

    /// Terminal width in columns, 80 when unknown.
    fn columns(&self) -> u16;
}

/// In-memory terminal for tests: scripted input lines, captured output.
#[derive(Debug, Default)]
pub struct BufferTerminal {
    input: std::collections::VecDeque<String>,
    output: String,
    columns: u16,
}

impl BufferTerminal {
    #[must_use]
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: lines.into_iter().map(Into::into).collect(),
            output: String::new(),
            columns: 80,
        }
    }

    #[must_use]
    pub fn with_columns(mut self, columns: u16) -> Self {
        self.columns = columns;
        self
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Terminal for BufferTerminal {
    fn write(&mut self, data: &str) {
        self.output.push_str(data);
    }

    fn read_line(&mut self, _timeout: Duration) -> LineRead {
        match self.input.pop_front() {
            Some(line) => LineRead::Line(line),
            None => LineRead::Eof,
        }
    }

    fn is_interactive(&self) -> bool {
        false
    }

    fn columns(&self) -> u16 {
        self.columns
    }
}
