//! Terminal boundary of the agent loop.

use std::sync::Arc;
use std::time::Duration;

use agent_provider::{CancelSignal, ToolCall, ToolResult};
use agent_terminal::{clip_to_width, paint, InterruptHandler, LineRead, Style, Terminal};

use crate::tools::EditPreview;

const INPUT_POLL: Duration = Duration::from_millis(50);
const PROMPT: &str = "> ";
const CONFIRM_PROMPT: &str = "apply this change? [y/N] ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Text(String),
    /// Interrupt at the prompt.
    Cancel,
    /// Input closed or termination requested.
    Exit,
}

/// What the agent loop needs from a terminal.
pub trait TerminalIo {
    fn render_text_delta(&mut self, text: &str);

    /// Closes the streamed assistant text, if any was written.
    fn end_response(&mut self);

    fn render_tool_call(&mut self, call: &ToolCall);

    fn render_tool_result(&mut self, call: &ToolCall, result: &ToolResult);

    fn render_notice(&mut self, message: &str);

    fn render_error(&mut self, kind: &str, message: &str);

    fn read_user_input(&mut self) -> UserInput;

    /// Shows a pending file change and asks whether to apply it. Returning
    /// `false` rejects the change.
    fn confirm_edit(&mut self, preview: &EditPreview) -> bool;

    /// Called before the first model request of a submission with the flag
    /// that cancels it.
    fn turn_started(&mut self, _cancel: &CancelSignal) {}

    fn turn_finished(&mut self) {}
}

enum LineWait {
    Line(String),
    Interrupted,
    Closed,
}

/// Console adapter over an [`agent_terminal::Terminal`].
pub struct ConsoleIo<T: Terminal> {
    terminal: T,
    interrupts: Arc<InterruptHandler>,
    color: bool,
    in_response: bool,
}

impl<T: Terminal> ConsoleIo<T> {
    pub fn new(terminal: T, interrupts: Arc<InterruptHandler>, color: bool) -> Self {
        Self {
            terminal,
            interrupts,
            color,
            in_response: false,
        }
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.terminal
    }

    fn line(&mut self, text: &str) {
        self.end_response();
        self.terminal.write(text);
        self.terminal.write("\n");
    }

    fn clip(&self, text: &str) -> String {
        let width = usize::from(self.terminal.columns()).saturating_sub(4).max(20);
        clip_to_width(first_line(text), width)
    }

    /// Polls for one line. Interrupts counted before the call do not end it.
    fn wait_for_line(&mut self) -> LineWait {
        let baseline = self.interrupts.interrupt_count();
        loop {
            if self.interrupts.terminate_requested() {
                self.terminal.write("\n");
                return LineWait::Closed;
            }
            if self.interrupts.interrupt_count() != baseline {
                self.terminal.write("\n");
                return LineWait::Interrupted;
            }
            match self.terminal.read_line(INPUT_POLL) {
                LineRead::Line(line) => return LineWait::Line(line),
                LineRead::Eof => {
                    self.terminal.write("\n");
                    return LineWait::Closed;
                }
                LineRead::Pending => {}
            }
        }
    }
}

impl<T: Terminal> TerminalIo for ConsoleIo<T> {
    fn render_text_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.in_response = true;
        self.terminal.write(text);
    }

    fn end_response(&mut self) {
        if self.in_response {
            self.terminal.write("\n");
            self.in_response = false;
        }
    }

    fn render_tool_call(&mut self, call: &ToolCall) {
        let arguments = serde_json::Value::Object(call.arguments.clone()).to_string();
        let summary = self.clip(&format!("{} {arguments}", call.name));
        let text = paint(&format!("› {summary}"), Style::Cyan, self.color);
        self.line(&text);
    }

    fn render_tool_result(&mut self, _call: &ToolCall, result: &ToolResult) {
        let lines = result.output.lines().count();
        let mut summary = self.clip(&result.output);
        if lines > 1 {
            summary.push_str(&format!(" (+{} lines)", lines - 1));
        }
        if result.truncated {
            summary.push_str(" [truncated]");
        }
        let text = if result.is_error() {
            paint(&format!("  ✗ {summary}"), Style::Red, self.color)
        } else {
            paint(&format!("  ✓ {summary}"), Style::Dim, self.color)
        };
        self.line(&text);
    }

    fn render_notice(&mut self, message: &str) {
        let text = paint(message, Style::Yellow, self.color);
        self.line(&text);
    }

    fn render_error(&mut self, kind: &str, message: &str) {
        let text = paint(&format!("error [{kind}]: {message}"), Style::Red, self.color);
        self.line(&text);
    }

    fn read_user_input(&mut self) -> UserInput {
        self.end_response();
        let prompt = paint(PROMPT, Style::Bold, self.color);
        self.terminal.write(&prompt);

        match self.wait_for_line() {
            LineWait::Line(line) => UserInput::Text(line),
            LineWait::Interrupted => UserInput::Cancel,
            LineWait::Closed => UserInput::Exit,
        }
    }

    fn confirm_edit(&mut self, preview: &EditPreview) -> bool {
        let verb = if preview.creates { "create" } else { "modify" };
        self.line(&paint(&format!("{verb} {}", preview.path), Style::Bold, self.color));
        for diff_line in preview.diff.lines() {
            let style = if diff_line.starts_with("+++") || diff_line.starts_with("---") {
                Style::Dim
            } else if diff_line.starts_with('+') {
                Style::Green
            } else if diff_line.starts_with('-') {
                Style::Red
            } else if diff_line.starts_with("@@") {
                Style::Cyan
            } else {
                Style::Dim
            };
            let text = paint(diff_line, style, self.color);
            self.line(&text);
        }
        let prompt = paint(CONFIRM_PROMPT, Style::Bold, self.color);
        self.terminal.write(&prompt);

        match self.wait_for_line() {
            LineWait::Line(answer) => {
                matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
            }
            LineWait::Interrupted | LineWait::Closed => false,
        }
    }

    fn turn_started(&mut self, cancel: &CancelSignal) {
        self.interrupts.arm(Arc::clone(cancel));
    }

    fn turn_finished(&mut self) {
        self.interrupts.disarm();
        self.end_response();
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use agent_provider::{is_cancelled, new_cancel_signal};
    use agent_terminal::BufferTerminal;
    use serde_json::{json, Map};

    use super::*;

    fn console(lines: &[&str]) -> (ConsoleIo<BufferTerminal>, Arc<InterruptHandler>) {
        let interrupts = Arc::new(InterruptHandler::detached());
        let io = ConsoleIo::new(
            BufferTerminal::new(lines.iter().copied()),
            Arc::clone(&interrupts),
            false,
        );
        (io, interrupts)
    }

    #[test]
    fn streamed_text_is_closed_before_other_output() {
        let (mut io, _) = console(&[]);
        io.render_text_delta("Hel");
        io.render_text_delta("lo");
        io.render_notice("compacted");
        assert_eq!(io.terminal().output(), "Hello\ncompacted\n");
    }

    #[test]
    fn tool_lines_summarize_calls_and_results() {
        let (mut io, _) = console(&[]);
        let arguments: Map<String, serde_json::Value> =
            json!({"path": "a.txt"}).as_object().cloned().expect("object");
        let call = ToolCall::new("c1", "read_file", arguments);
        io.render_tool_call(&call);
        io.render_tool_result(&call, &ToolResult::ok("c1", "one\ntwo\nthree"));
        io.render_tool_result(&call, &ToolResult::error("c1", "missing"));
        io.render_error("auth_failed", "bad key");

        assert_eq!(
            io.terminal().output(),
            "› read_file {\"path\":\"a.txt\"}\n  ✓ one (+2 lines)\n  ✗ missing\nerror [auth_failed]: bad key\n"
        );
    }

    #[test]
    fn prompt_returns_lines_then_exit() {
        let (mut io, _) = console(&["hello"]);
        assert_eq!(io.read_user_input(), UserInput::Text("hello".to_string()));
        assert_eq!(io.read_user_input(), UserInput::Exit);
    }

    struct InterruptingTerminal {
        interrupts: Arc<InterruptHandler>,
        output: String,
    }

    impl Terminal for InterruptingTerminal {
        fn write(&mut self, data: &str) {
            self.output.push_str(data);
        }

        fn read_line(&mut self, _timeout: Duration) -> LineRead {
            self.interrupts.deliver();
            LineRead::Pending
        }

        fn is_interactive(&self) -> bool {
            true
        }

        fn columns(&self) -> u16 {
            80
        }
    }

    #[test]
    fn interrupt_at_prompt_is_a_cancel() {
        let interrupts = Arc::new(InterruptHandler::detached());
        interrupts.deliver();
        let terminal = InterruptingTerminal {
            interrupts: Arc::clone(&interrupts),
            output: String::new(),
        };
        let mut io = ConsoleIo::new(terminal, Arc::clone(&interrupts), false);

        // Interrupts delivered before the prompt opened do not count.
        assert_eq!(io.read_user_input(), UserInput::Cancel);
        assert_eq!(interrupts.interrupt_count(), 2);
        assert_eq!(io.terminal().output, "> \n");
    }

    #[test]
    fn edit_confirmation_shows_the_diff_and_reads_an_answer() {
        let (mut io, _) = console(&["y", "", "no"]);
        let preview = EditPreview::new("a.txt", Some("old\n"), "new\n");

        assert!(io.confirm_edit(&preview));
        assert!(!io.confirm_edit(&preview));
        assert!(!io.confirm_edit(&preview));
        assert!(!io.confirm_edit(&preview), "closed input rejects");

        let output = io.terminal().output();
        assert!(output.starts_with("modify a.txt\n--- a/a.txt\n+++ b/a.txt\n"), "{output}");
        assert!(output.contains("-old\n+new\napply this change? [y/N] "), "{output}");
    }

    #[test]
    fn armed_turn_receives_interrupts() {
        let (mut io, interrupts) = console(&[]);
        let cancel = new_cancel_signal();
        io.turn_started(&cancel);
        interrupts.deliver();
        assert!(is_cancelled(&cancel));

        let next = new_cancel_signal();
        io.turn_finished();
        interrupts.deliver();
        assert!(!is_cancelled(&next));
    }
}
