use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use agent_terminal::{EnvConfig, InterruptHandler, ProcessTerminal, Terminal};
use anyhow::Context;
use clap::Parser;
use coding_agent::app;
use coding_agent::config::{Cli, Settings};
use coding_agent::console::ConsoleIo;
use coding_agent::providers;
use coding_agent::session::{Session, SessionOptions};
use coding_agent::tools::{BuiltinToolExecutor, ToolLimits};
use coding_agent::transcript::Transcript;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "CODING_AGENT_LOG";
const LOG_FILE_ENV_VAR: &str = "CODING_AGENT_LOG_FILE";

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = init_logging() {
        eprintln!("coding_agent: {error:#}");
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error:#}");
            eprintln!("coding_agent: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env()
        .and_then(|settings| settings.with_cli(cli).validate())
        .context("invalid configuration")?;
    tracing::info!(
        provider = %settings.provider,
        model = %settings.model,
        root = %settings.working_root.display(),
        "starting"
    );

    let client = providers::provider_for_settings(&settings)?;
    let limits = ToolLimits {
        output_chars: settings.tool_output_limit,
        default_command_timeout: settings.command_timeout,
        ..ToolLimits::default()
    };
    let tools = BuiltinToolExecutor::new(&settings.working_root)
        .context("working root is unusable")?
        .with_limits(limits);

    let mut session = Session::new(
        SessionOptions::from_settings(&settings),
        client,
        Box::new(tools),
    );
    if settings.resume {
        let (transcript, messages) = Transcript::resume_latest(&settings.working_root)
            .context("no session to resume")?;
        let restored = session.restore(messages)?;
        tracing::info!(restored, session_id = transcript.session_id(), "resumed");
        session = session.with_transcript(transcript);
    } else if settings.transcript {
        let transcript = Transcript::create(&settings.working_root, &settings.model)
            .context("failed to start transcript")?;
        session = session.with_transcript(transcript);
    }

    let interrupts = Arc::new(InterruptHandler::install().context("failed to install signal handlers")?);
    let env = EnvConfig::from_env();
    let terminal = ProcessTerminal::new(&env);
    let color = env.color_enabled(terminal.is_interactive());
    let mut io = ConsoleIo::new(terminal, interrupts, color);

    let restored = session.conversation().len().saturating_sub(1);
    if restored > 0 {
        io.terminal_mut()
            .write(&format!("resumed session with {restored} messages\n"));
    }

    let result = app::run(&mut session, &mut io);
    io.terminal_mut().stop();

    match result {
        Ok(reason) => {
            tracing::info!(?reason, "exiting");
            Ok(())
        }
        Err(error) => Err(anyhow::Error::new(error).context("session ended by an internal error")),
    }
}

/// Logs go to stderr, or to `CODING_AGENT_LOG_FILE` so they never mix with
/// streamed output.
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match std::env::var_os(LOG_FILE_ENV_VAR) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.to_string_lossy()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
