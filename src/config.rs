//! Environment configuration for the console.

use std::env;

/// Disables ANSI styling when set to any non-empty value (<https://no-color.org>).
pub const NO_COLOR_ENV_VAR: &str = "NO_COLOR";
/// Forces styling on even when stdout is not a TTY.
pub const FORCE_COLOR_ENV_VAR: &str = "AGENT_TERMINAL_FORCE_COLOR";
/// Appends a copy of every terminal write to this file.
pub const WRITE_LOG_ENV_VAR: &str = "AGENT_TERMINAL_WRITE_LOG";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub no_color: bool,
    pub force_color: bool,
    pub write_log: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            no_color: env_string_opt(NO_COLOR_ENV_VAR).is_some(),
            force_color: env_flag(FORCE_COLOR_ENV_VAR),
            write_log: env_string_opt(WRITE_LOG_ENV_VAR),
        }
    }

    /// Decides whether output should carry ANSI styling.
    ///
    /// `NO_COLOR` wins over everything; otherwise styling follows the TTY
    /// check unless forced.
    #[must_use]
    pub fn color_enabled(&self, stdout_is_tty: bool) -> bool {
        if self.no_color {
            return false;
        }
        self.force_color || stdout_is_tty
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
