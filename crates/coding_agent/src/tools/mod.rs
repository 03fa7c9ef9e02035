//! Builtin tool registry and executor.
//!
//! The tool set is closed: [`ToolKind`] enumerates every tool the model may
//! call. Arguments are checked against [`schema`] tables before any side
//! effect, and every failure is reported as an error [`ToolResult`] rather
//! than escaping the agent loop.

mod command;
mod diff;
mod fs;
mod output;
mod paths;
pub mod schema;
mod search;

use std::path::Path;
use std::time::Duration;

use agent_provider::{CancelSignal, ToolCall, ToolDefinition, ToolResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

pub use command::CommandSpec;
pub use diff::{unified_diff, EditPreview};
pub use fs::DEFAULT_READ_MAX_BYTES;
pub use output::truncate;
pub use paths::WorkingRoot;

use crate::config::{
    DEFAULT_COMMAND_TIMEOUT_SEC, DEFAULT_TOOL_OUTPUT_LIMIT, MAX_COMMAND_TIMEOUT_SEC,
};
use crate::error::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ReadFile,
    WriteFile,
    EditFile,
    ListDir,
    RunCommand,
    Search,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        Self::ReadFile,
        Self::WriteFile,
        Self::EditFile,
        Self::ListDir,
        Self::RunCommand,
        Self::Search,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::EditFile => "edit_file",
            Self::ListDir => "list_dir",
            Self::RunCommand => "run_command",
            Self::Search => "search",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::ReadFile => "Read a UTF-8 text file inside the working root.",
            Self::WriteFile => {
                "Create or overwrite a file with the given content. Parent directories are created."
            }
            Self::EditFile => {
                "Replace one exact occurrence of old_text with new_text in an existing file."
            }
            Self::ListDir => "List directory entries, sorted, with directories suffixed by '/'.",
            Self::RunCommand => {
                "Run a command in the working root and return its exit status, stdout and stderr."
            }
            Self::Search => {
                "Search text files for a regular expression, honoring .gitignore. Returns path:line: text."
            }
        }
    }

    #[must_use]
    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: schema::json_schema(self),
        }
    }
}

/// Runs tool calls against the host.
pub trait ToolExecutor: Send {
    /// Definitions advertised with every model request.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Executes `call`. Never fails: errors are reported in the result.
    fn execute(&mut self, call: &ToolCall, cancel: &CancelSignal) -> ToolResult;

    /// The file change `call` would make, for calls that modify files.
    /// `None` when the call changes no file or would fail anyway.
    fn preview(&self, _call: &ToolCall) -> Option<EditPreview> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolLimits {
    pub output_chars: usize,
    pub read_max_bytes: u64,
    pub default_command_timeout: Duration,
    pub max_command_timeout: Duration,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            output_chars: DEFAULT_TOOL_OUTPUT_LIMIT,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
            default_command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SEC),
            max_command_timeout: Duration::from_secs(MAX_COMMAND_TIMEOUT_SEC),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuiltinToolExecutor {
    root: WorkingRoot,
    limits: ToolLimits,
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditArgs {
    path: String,
    old_text: String,
    new_text: String,
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Deserialize)]
struct SearchArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

impl BuiltinToolExecutor {
    pub fn new(working_root: impl AsRef<Path>) -> Result<Self, ToolError> {
        Ok(Self {
            root: WorkingRoot::new(working_root)?,
            limits: ToolLimits::default(),
        })
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ToolLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn working_root(&self) -> &Path {
        self.root.path()
    }

    pub fn limits(&self) -> ToolLimits {
        self.limits
    }

    fn dispatch(&self, call: &ToolCall, cancel: &CancelSignal) -> Result<String, ToolError> {
        let kind =
            ToolKind::from_name(&call.name).ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        schema::validate(kind, &call.arguments)?;

        match kind {
            ToolKind::ReadFile => {
                let args: PathArgs = parse_args(&call.arguments)?;
                fs::read_file(&self.root, &args.path, self.limits.read_max_bytes)
            }
            ToolKind::WriteFile => {
                let args: WriteArgs = parse_args(&call.arguments)?;
                fs::write_file(&self.root, &args.path, &args.content)
            }
            ToolKind::EditFile => {
                let args: EditArgs = parse_args(&call.arguments)?;
                fs::edit_file(&self.root, &args.path, &args.old_text, &args.new_text)
            }
            ToolKind::ListDir => {
                let args: PathArgs = parse_args(&call.arguments)?;
                fs::list_dir(&self.root, &args.path)
            }
            ToolKind::RunCommand => {
                let args: CommandArgs = parse_args(&call.arguments)?;
                let spec = self.command_spec(args)?;
                command::run_command(self.root.path(), &spec, cancel)
            }
            ToolKind::Search => {
                let args: SearchArgs = parse_args(&call.arguments)?;
                search::search(&self.root, &args.pattern, args.path.as_deref(), cancel)
            }
        }
    }

    fn plan(&self, call: &ToolCall) -> Result<Option<EditPreview>, ToolError> {
        let Some(kind) = ToolKind::from_name(&call.name) else {
            return Ok(None);
        };
        match kind {
            ToolKind::WriteFile => {
                schema::validate(kind, &call.arguments)?;
                let args: WriteArgs = parse_args(&call.arguments)?;
                fs::plan_write(&self.root, &args.path, &args.content).map(Some)
            }
            ToolKind::EditFile => {
                schema::validate(kind, &call.arguments)?;
                let args: EditArgs = parse_args(&call.arguments)?;
                fs::plan_edit(&self.root, &args.path, &args.old_text, &args.new_text).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn command_spec(&self, args: CommandArgs) -> Result<CommandSpec, ToolError> {
        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "command must not be empty".to_string(),
            ));
        }

        let timeout = match args.timeout {
            None => self.limits.default_command_timeout,
            Some(0) => {
                return Err(ToolError::InvalidArguments(
                    "timeout must be at least 1 second".to_string(),
                ));
            }
            Some(seconds) => Duration::from_secs(seconds).min(self.limits.max_command_timeout),
        };

        Ok(CommandSpec {
            command: args.command,
            args: args.args.unwrap_or_default(),
            timeout,
        })
    }
}

impl ToolExecutor for BuiltinToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        ToolKind::ALL.into_iter().map(ToolKind::definition).collect()
    }

    fn execute(&mut self, call: &ToolCall, cancel: &CancelSignal) -> ToolResult {
        let span = tracing::info_span!("tool", name = %call.name, id = %call.id);
        let _entered = span.enter();

        let outcome = self.dispatch(call, cancel);
        let (mut result, text) = match outcome {
            Ok(text) => (ToolResult::ok(&call.id, String::new()), text),
            Err(error) => {
                tracing::debug!(%error, "tool failed");
                (ToolResult::error(&call.id, String::new()), error.to_string())
            }
        };

        let (text, truncated) = truncate(text, self.limits.output_chars);
        result.output = text;
        result.truncated = truncated;
        result
    }

    fn preview(&self, call: &ToolCall) -> Option<EditPreview> {
        match self.plan(call) {
            Ok(preview) => preview,
            Err(error) => {
                tracing::debug!(%error, name = %call.name, "no preview; execution will report the error");
                None
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: &Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .map_err(|error| ToolError::InvalidArguments(error.to_string()))
}
