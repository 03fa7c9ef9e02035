//! Startup settings: environment first, CLI flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

pub const PROVIDER_ENV_VAR: &str = "CODING_AGENT_PROVIDER";
pub const MODEL_ENV_VAR: &str = "CODING_AGENT_MODEL";
pub const API_BASE_URL_ENV_VAR: &str = "CODING_AGENT_API_BASE_URL";
pub const API_KEY_ENV_VAR: &str = "CODING_AGENT_API_KEY";
pub const FALLBACK_API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";
pub const WORKING_ROOT_ENV_VAR: &str = "CODING_AGENT_WORKING_ROOT";
pub const MAX_TURNS_ENV_VAR: &str = "CODING_AGENT_MAX_TURNS";
pub const CONTEXT_BUDGET_ENV_VAR: &str = "CODING_AGENT_CONTEXT_BUDGET";
pub const CHARS_PER_TOKEN_ENV_VAR: &str = "CODING_AGENT_CHARS_PER_TOKEN";
pub const TOOL_OUTPUT_LIMIT_ENV_VAR: &str = "CODING_AGENT_TOOL_OUTPUT_LIMIT";
pub const COMMAND_TIMEOUT_ENV_VAR: &str = "CODING_AGENT_COMMAND_TIMEOUT";
pub const TRANSCRIPT_ENV_VAR: &str = "CODING_AGENT_TRANSCRIPT";
pub const SYSTEM_INSTRUCTIONS_ENV_VAR: &str = "CODING_AGENT_SYSTEM_INSTRUCTIONS";
pub const AUTO_APPROVE_ENV_VAR: &str = "CODING_AGENT_AUTO_APPROVE";

pub const DEFAULT_PROVIDER: &str = "chat-api";
pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_TURNS: u32 = 25;
pub const DEFAULT_CONTEXT_BUDGET: usize = 128_000;
pub const DEFAULT_CHARS_PER_TOKEN: usize = 3;
pub const DEFAULT_TOOL_OUTPUT_LIMIT: usize = 16_000;
pub const DEFAULT_COMMAND_TIMEOUT_SEC: u64 = 30;
pub const MAX_COMMAND_TIMEOUT_SEC: u64 = 600;

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You are a careful coding agent working inside the user's repository. \
Use the provided tools to inspect files before changing them, keep edits minimal, \
run commands to verify your work, and say plainly when a request cannot be completed.";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{key} must be a positive integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("working root {path} is not usable: {source}")]
    WorkingRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("working root {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// Command-line flags. Every flag overrides its environment counterpart.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "coding_agent", version, about = "Terminal coding agent for chat-completions models")]
pub struct Cli {
    /// Model backend: `chat-api` or `mock`.
    #[arg(long)]
    pub provider: Option<String>,
    /// Model identifier sent with every request.
    #[arg(long)]
    pub model: Option<String>,
    /// Base URL of the chat-completions API.
    #[arg(long)]
    pub api_base_url: Option<String>,
    /// Directory the tools operate in.
    #[arg(long)]
    pub working_root: Option<PathBuf>,
    /// Model requests allowed per submitted message.
    #[arg(long)]
    pub max_turns: Option<u32>,
    /// Estimated token budget for the conversation.
    #[arg(long)]
    pub context_budget: Option<usize>,
    /// Record the session as JSONL under `.coding_agent/sessions/`.
    #[arg(long)]
    pub transcript: bool,
    /// Continue the most recent recorded session in the working root.
    #[arg(long)]
    pub resume: bool,
    /// Apply file edits without showing a diff for approval.
    #[arg(long)]
    pub auto_approve: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub provider: String,
    pub model: String,
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub working_root: PathBuf,
    pub max_turns: u32,
    pub context_budget: usize,
    pub chars_per_token: usize,
    pub tool_output_limit: usize,
    pub command_timeout: Duration,
    pub transcript: bool,
    pub resume: bool,
    pub auto_approve: bool,
    pub system_instructions: String,
}

impl Settings {
    /// Settings with every default, rooted at `working_root`.
    #[must_use]
    pub fn defaults(working_root: impl Into<PathBuf>) -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            working_root: working_root.into(),
            max_turns: DEFAULT_MAX_TURNS,
            context_budget: DEFAULT_CONTEXT_BUDGET,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            tool_output_limit: DEFAULT_TOOL_OUTPUT_LIMIT,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SEC),
            transcript: false,
            resume: false,
            auto_approve: false,
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
        }
    }

    /// Reads the process environment. The working root defaults to the current directory.
    pub fn from_env() -> Result<Self, SettingsError> {
        let cwd = std::env::current_dir().map_err(|source| SettingsError::WorkingRoot {
            path: PathBuf::from("."),
            source,
        })?;
        Self::from_lookup(|key| std::env::var(key).ok(), &cwd)
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F, default_root: &Path) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut settings = Self::defaults(default_root);
        if let Some(provider) = read(PROVIDER_ENV_VAR) {
            settings.provider = provider;
        }
        if let Some(model) = read(MODEL_ENV_VAR) {
            settings.model = model;
        }
        if let Some(base_url) = read(API_BASE_URL_ENV_VAR) {
            settings.api_base_url = base_url;
        }
        settings.api_key = read(API_KEY_ENV_VAR).or_else(|| read(FALLBACK_API_KEY_ENV_VAR));
        if let Some(root) = read(WORKING_ROOT_ENV_VAR) {
            settings.working_root = PathBuf::from(root);
        }
        if let Some(value) = read(MAX_TURNS_ENV_VAR) {
            let turns = parse_positive(MAX_TURNS_ENV_VAR, &value)?;
            settings.max_turns = u32::try_from(turns).map_err(|_| SettingsError::OutOfRange {
                key: MAX_TURNS_ENV_VAR,
                value: turns,
                min: 1,
                max: u64::from(u32::MAX),
            })?;
        }
        if let Some(value) = read(CONTEXT_BUDGET_ENV_VAR) {
            settings.context_budget = parse_positive(CONTEXT_BUDGET_ENV_VAR, &value)? as usize;
        }
        if let Some(value) = read(CHARS_PER_TOKEN_ENV_VAR) {
            settings.chars_per_token = parse_positive(CHARS_PER_TOKEN_ENV_VAR, &value)? as usize;
        }
        if let Some(value) = read(TOOL_OUTPUT_LIMIT_ENV_VAR) {
            settings.tool_output_limit =
                parse_positive(TOOL_OUTPUT_LIMIT_ENV_VAR, &value)? as usize;
        }
        if let Some(value) = read(COMMAND_TIMEOUT_ENV_VAR) {
            let seconds = parse_positive(COMMAND_TIMEOUT_ENV_VAR, &value)?;
            if seconds > MAX_COMMAND_TIMEOUT_SEC {
                return Err(SettingsError::OutOfRange {
                    key: COMMAND_TIMEOUT_ENV_VAR,
                    value: seconds,
                    min: 1,
                    max: MAX_COMMAND_TIMEOUT_SEC,
                });
            }
            settings.command_timeout = Duration::from_secs(seconds);
        }
        settings.transcript = read(TRANSCRIPT_ENV_VAR).is_some_and(|value| is_truthy(&value));
        settings.auto_approve = read(AUTO_APPROVE_ENV_VAR).is_some_and(|value| is_truthy(&value));
        settings.system_instructions = sanitize_system_instructions(lookup(SYSTEM_INSTRUCTIONS_ENV_VAR));

        Ok(settings)
    }

    /// Applies CLI flags over the environment-derived values.
    #[must_use]
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(provider) = cli.provider.as_ref() {
            self.provider = provider.trim().to_string();
        }
        if let Some(model) = cli.model.as_ref() {
            self.model = model.trim().to_string();
        }
        if let Some(base_url) = cli.api_base_url.as_ref() {
            self.api_base_url = base_url.trim().to_string();
        }
        if let Some(root) = cli.working_root.as_ref() {
            self.working_root = root.clone();
        }
        if let Some(turns) = cli.max_turns {
            self.max_turns = turns;
        }
        if let Some(budget) = cli.context_budget {
            self.context_budget = budget;
        }
        self.transcript |= cli.transcript;
        self.resume |= cli.resume;
        self.auto_approve |= cli.auto_approve;
        self
    }

    /// Final checks after all sources are merged. Canonicalizes the working root.
    pub fn validate(mut self) -> Result<Self, SettingsError> {
        if self.max_turns == 0 {
            return Err(SettingsError::OutOfRange {
                key: MAX_TURNS_ENV_VAR,
                value: 0,
                min: 1,
                max: u64::from(u32::MAX),
            });
        }
        if self.context_budget == 0 {
            return Err(SettingsError::OutOfRange {
                key: CONTEXT_BUDGET_ENV_VAR,
                value: 0,
                min: 1,
                max: u64::MAX,
            });
        }

        let root = self
            .working_root
            .canonicalize()
            .map_err(|source| SettingsError::WorkingRoot {
                path: self.working_root.clone(),
                source,
            })?;
        if !root.is_dir() {
            return Err(SettingsError::NotADirectory(root));
        }
        self.working_root = root;
        Ok(self)
    }
}

/// Trims configured instructions and falls back to the built-in block when empty.
pub fn sanitize_system_instructions(value: Option<String>) -> String {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTIONS.to_string())
}

fn parse_positive(key: &'static str, value: &str) -> Result<u64, SettingsError> {
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(SettingsError::InvalidNumber {
            key,
            value: value.to_string(),
        }),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
