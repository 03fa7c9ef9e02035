pub const HELP_TEXT: &str = "Commands:
  /help     show this help
  /clear    forget the conversation (system instructions are kept)
  /compact  shrink the conversation to half of the context budget
  /status   show provider, model and context usage
  /model    show the model, or switch with /model NAME
  /auto     toggle applying file edits without approval
  /quit     exit (also /exit, Ctrl-D, or Ctrl-C twice at the prompt)
Ctrl-C during a turn cancels it.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Clear,
    Compact,
    Status,
    /// `/model` alone reports the current model.
    Model(Option<String>),
    AutoApprove,
    Quit,
    Unknown(String),
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = words.next().unwrap_or(trimmed).to_string();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/clear" => SlashCommand::Clear,
        "/compact" => SlashCommand::Compact,
        "/status" => SlashCommand::Status,
        "/model" => SlashCommand::Model(words.next().map(str::to_string)),
        "/auto" => SlashCommand::AutoApprove,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}
