//! Declarative command registry.
//!
//! Every operation the service exposes is one [`CommandSpec`] record; the
//! RPC tool list, CLI subcommand tree, and HTTP handlers are derived from
//! this table mechanically. Handlers deserialize the untyped argument map
//! into per-command argument records at the boundary and call the typed
//! service layer.

pub mod context;
pub mod format;
pub mod health;
pub mod lease;
pub mod project;
pub mod task;
pub mod task_type;

use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::domain::errors::{DomainError, DomainResult};

pub use context::CommandContext;

/// Untyped argument bag handed to a handler by a surface adapter.
pub type CommandArgs = serde_json::Map<String, serde_json::Value>;

pub type HandlerFuture = BoxFuture<'static, DomainResult<serde_json::Value>>;

/// Command handler: context + argument map to a JSON result.
pub type Handler = fn(Arc<CommandContext>, CommandArgs) -> HandlerFuture;

/// Render a command result for human CLI output.
pub type HumanFormatter = fn(&serde_json::Value) -> String;

/// Wire type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    /// JSON Schema type name for the RPC tool surface.
    pub fn schema_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared parameter of a command.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Wire name (camelCase), also the JSON key handlers receive.
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    /// Whether the CLI surface takes this parameter positionally.
    pub positional: bool,
    pub default: Option<&'static str>,
    pub choices: &'static [&'static str],
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            positional: false,
            default: None,
            choices: &[],
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            positional: false,
            default: None,
            choices: &[],
        }
    }

    pub const fn positional(mut self) -> Self {
        self.positional = true;
        self
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn with_choices(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = choices;
        self
    }
}

/// A command: one row of the registry from which all surfaces derive.
pub struct CommandSpec {
    /// Canonical name (camelCase).
    pub name: &'static str,
    /// RPC tool name (snake_case).
    pub rpc_name: &'static str,
    /// CLI subcommand name (kebab-case).
    pub cli_name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub handler: Handler,
    pub format_human: HumanFormatter,
}

static REGISTRY: LazyLock<Vec<CommandSpec>> = LazyLock::new(|| {
    let mut commands = Vec::new();
    commands.extend(project::specs());
    commands.extend(task_type::specs());
    commands.extend(task::specs());
    commands.extend(lease::specs());
    commands.extend(health::specs());
    commands
});

/// The full command catalog.
pub fn registry() -> &'static [CommandSpec] {
    &REGISTRY
}

/// Look up a command by any of its three names.
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    registry()
        .iter()
        .find(|c| c.name == name || c.rpc_name == name || c.cli_name == name)
}

/// Deserialize the argument map into a typed argument record.
pub fn parse_args<T: DeserializeOwned>(args: CommandArgs) -> DomainResult<T> {
    serde_json::from_value(serde_json::Value::Object(args))
        .map_err(|e| DomainError::Validation(format!("invalid arguments: {e}")))
}

/// Serialize a handler result.
pub fn to_value<T: serde::Serialize>(value: &T) -> DomainResult<serde_json::Value> {
    serde_json::to_value(value).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_size_and_uniqueness() {
        let commands = registry();
        assert!(commands.len() >= 22, "catalog has {} commands", commands.len());

        let mut names = HashSet::new();
        let mut rpc_names = HashSet::new();
        let mut cli_names = HashSet::new();
        for command in commands {
            assert!(names.insert(command.name), "duplicate name {}", command.name);
            assert!(
                rpc_names.insert(command.rpc_name),
                "duplicate rpc name {}",
                command.rpc_name
            );
            assert!(
                cli_names.insert(command.cli_name),
                "duplicate cli name {}",
                command.cli_name
            );
        }
    }

    #[test]
    fn test_naming_conventions() {
        for command in registry() {
            assert!(
                command
                    .rpc_name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "{} is not snake_case",
                command.rpc_name
            );
            assert!(
                command
                    .cli_name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
                "{} is not kebab-case",
                command.cli_name
            );
            assert!(!command.description.is_empty());
        }
    }

    #[test]
    fn test_positional_params_precede_flags() {
        // Positional CLI parameters must form a required-then-optional
        // prefix of the declaration order.
        for command in registry() {
            let mut seen_non_positional = false;
            for param in &command.params {
                if param.positional {
                    assert!(
                        !seen_non_positional,
                        "{}: positional {} after flag",
                        command.name, param.name
                    );
                } else {
                    seen_non_positional = true;
                }
            }
        }
    }

    #[test]
    fn test_find_by_any_name() {
        assert!(find("createProject").is_some());
        assert!(find("create_project").is_some());
        assert!(find("create-project").is_some());
        assert!(find("nope").is_none());
    }
}
