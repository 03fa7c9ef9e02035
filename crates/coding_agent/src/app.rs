//! Prompt loop: reads input, routes slash commands, submits everything else.

use crate::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use crate::console::{TerminalIo, UserInput};
use crate::error::AgentError;
use crate::session::Session;

/// Why the prompt loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Quit,
    EndOfInput,
    Interrupted,
}

/// Runs the prompt loop until the user leaves.
///
/// An interrupt at an idle prompt only warns; a second consecutive one
/// exits. Internal errors end the loop after being rendered.
pub fn run(session: &mut Session, io: &mut dyn TerminalIo) -> Result<ExitReason, AgentError> {
    let mut pending_interrupt = false;

    loop {
        let text = match io.read_user_input() {
            UserInput::Exit => return Ok(ExitReason::EndOfInput),
            UserInput::Cancel if pending_interrupt => return Ok(ExitReason::Interrupted),
            UserInput::Cancel => {
                pending_interrupt = true;
                io.render_notice("press Ctrl-C again or type /quit to exit");
                continue;
            }
            UserInput::Text(text) => text,
        };
        pending_interrupt = false;

        let input = text.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = parse_slash_command(input) {
            if handle_command(session, io, command) {
                return Ok(ExitReason::Quit);
            }
            continue;
        }

        if let Err(error) = session.submit(input, io) {
            io.render_error(error.kind_label(), &error.detail());
            return Err(error);
        }
    }
}

/// Returns `true` when the command asks to quit.
fn handle_command(session: &mut Session, io: &mut dyn TerminalIo, command: SlashCommand) -> bool {
    match command {
        SlashCommand::Help => io.render_notice(HELP_TEXT),
        SlashCommand::Clear => {
            session.clear();
            io.render_notice("conversation cleared");
        }
        SlashCommand::Compact => {
            let target = session.options().context_budget / 2;
            match session.compact_to(target) {
                Ok(Some(compaction)) => io.render_notice(&format!(
                    "removed {} messages ({} -> {} estimated tokens)",
                    compaction.removed_messages, compaction.tokens_before, compaction.tokens_after
                )),
                Ok(None) => io.render_notice("nothing to compact"),
                Err(error) => io.render_error("context_exceeded", &error.to_string()),
            }
        }
        SlashCommand::Status => {
            let status = session.status();
            let mut lines = vec![
                format!("provider: {}", status.provider),
                format!("model: {}", status.model),
                format!("turns: {}", status.submissions),
                format!(
                    "edits: {}",
                    if status.auto_approve_edits { "auto-approved" } else { "confirm each" }
                ),
                format!("messages: {}", status.messages),
                format!(
                    "context: ~{} / {} tokens",
                    status.estimated_tokens, status.context_budget
                ),
            ];
            if let Some(path) = status.transcript {
                lines.push(format!("transcript: {path}"));
            }
            io.render_notice(&lines.join("\n"));
        }
        SlashCommand::Model(None) => {
            io.render_notice(&format!("model: {}", session.options().model));
        }
        SlashCommand::Model(Some(model)) => {
            session.set_model(model.as_str());
            io.render_notice(&format!("model switched to {model}"));
        }
        SlashCommand::AutoApprove => {
            let enabled = !session.options().auto_approve_edits;
            session.set_auto_approve_edits(enabled);
            io.render_notice(if enabled {
                "auto-approve on: file edits are applied without asking"
            } else {
                "auto-approve off: file edits need confirmation"
            });
        }
        SlashCommand::Quit => return true,
        SlashCommand::Unknown(name) => {
            io.render_notice(&format!("unknown command {name}; try /help"));
        }
    }
    false
}
