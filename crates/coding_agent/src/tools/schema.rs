//! Parameter tables and boundary validation for the builtin tools.

use serde_json::{json, Map, Value};

use super::ToolKind;
use crate::error::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    StringArray,
    Integer,
}

impl ParamType {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::StringArray => "array",
            Self::Integer => "integer",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Integer => value.is_u64(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::StringArray => "an array of strings",
            Self::Integer => "a non-negative integer",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub required: bool,
    pub description: &'static str,
}

const fn required(name: &'static str, kind: ParamType, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        description,
    }
}

const fn optional(name: &'static str, kind: ParamType, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        description,
    }
}

const PATH: ParamSpec = required("path", ParamType::String, "Path relative to the working root.");

const READ_FILE: &[ParamSpec] = &[PATH];
const WRITE_FILE: &[ParamSpec] = &[
    PATH,
    required("content", ParamType::String, "Full new file content."),
];
const EDIT_FILE: &[ParamSpec] = &[
    PATH,
    required(
        "old_text",
        ParamType::String,
        "Exact text to replace. Must occur exactly once.",
    ),
    required("new_text", ParamType::String, "Replacement text."),
];
const LIST_DIR: &[ParamSpec] = &[PATH];
const RUN_COMMAND: &[ParamSpec] = &[
    required(
        "command",
        ParamType::String,
        "Shell command line, or the program to execute when args are given.",
    ),
    optional(
        "args",
        ParamType::StringArray,
        "Arguments passed directly to the program, bypassing the shell.",
    ),
    optional("timeout", ParamType::Integer, "Timeout in seconds."),
];
const SEARCH: &[ParamSpec] = &[
    required("pattern", ParamType::String, "Regular expression to search for."),
    optional(
        "path",
        ParamType::String,
        "File or directory to search, relative to the working root. Defaults to the root.",
    ),
];

pub fn params(kind: ToolKind) -> &'static [ParamSpec] {
    match kind {
        ToolKind::ReadFile => READ_FILE,
        ToolKind::WriteFile => WRITE_FILE,
        ToolKind::EditFile => EDIT_FILE,
        ToolKind::ListDir => LIST_DIR,
        ToolKind::RunCommand => RUN_COMMAND,
        ToolKind::Search => SEARCH,
    }
}

/// JSON schema advertised to the model for `kind`.
pub fn json_schema(kind: ToolKind) -> Value {
    let mut properties = Map::new();
    let mut required_names = Vec::new();
    for param in params(kind) {
        let mut property = json!({
            "type": param.kind.json_type(),
            "description": param.description,
        });
        if param.kind == ParamType::StringArray {
            property["items"] = json!({ "type": "string" });
        }
        properties.insert(param.name.to_string(), property);
        if param.required {
            required_names.push(param.name);
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required_names,
        "additionalProperties": false,
    })
}

/// Checks `arguments` against the parameter table before any side effect.
pub fn validate(kind: ToolKind, arguments: &Map<String, Value>) -> Result<(), ToolError> {
    let specs = params(kind);

    for name in arguments.keys() {
        if !specs.iter().any(|spec| spec.name == name) {
            return Err(ToolError::InvalidArguments(format!(
                "{} does not accept parameter '{name}'",
                kind.name()
            )));
        }
    }

    for spec in specs {
        match arguments.get(spec.name) {
            None | Some(Value::Null) if spec.required => {
                return Err(ToolError::InvalidArguments(format!(
                    "{} requires parameter '{}'",
                    kind.name(),
                    spec.name
                )));
            }
            None | Some(Value::Null) => {}
            Some(value) if !spec.kind.matches(value) => {
                return Err(ToolError::InvalidArguments(format!(
                    "parameter '{}' must be {}",
                    spec.name,
                    spec.kind.describe()
                )));
            }
            Some(_) => {}
        }
    }

    Ok(())
}
