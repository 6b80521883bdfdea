//! CLI surface.
//!
//! The subcommand tree is generated from the command registry: positional
//! parameters become positionals in declaration order, everything else
//! becomes a `--kebab-case` flag taking a value. Argument values starting
//! with `@` are expanded to the named file's contents before dispatch.

use std::sync::Arc;

use clap::{Arg, ArgMatches, Command};

use crate::commands::{registry, CommandArgs, CommandContext, CommandSpec, ParamKind};
use crate::domain::errors::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_flag(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Human
        }
    }
}

/// Build the full CLI, including the global `--mode` / `--format` flags and
/// one subcommand per registry entry.
pub fn build_cli() -> Command {
    let mut root = Command::new("foreman")
        .about("Lease-based task orchestration service")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_parser(["rpc", "http", "cli"])
                .help("Run mode: rpc tool server (default), http API, or one-shot cli"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .global(true)
                .value_parser(["human", "json"])
                .default_value("human")
                .help("Output format for cli commands"),
        );
    for spec in registry() {
        root = root.subcommand(build_subcommand(spec));
    }
    root
}

fn build_subcommand(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(spec.cli_name).about(spec.description);
    let mut index = 1;
    for param in &spec.params {
        let mut arg = Arg::new(param.name).help(param.description);
        if param.positional {
            arg = arg.index(index);
            index += 1;
        } else {
            arg = arg.long(kebab_case(param.name));
        }
        if param.required {
            arg = arg.required(true);
        }
        if let Some(default) = param.default {
            arg = arg.default_value(default);
        }
        if !param.choices.is_empty() {
            arg = arg.value_parser(clap::builder::PossibleValuesParser::new(
                param.choices.to_vec(),
            ));
        }
        cmd = cmd.arg(arg);
    }
    cmd
}

/// camelCase wire name to kebab-case flag name.
fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Expand `@path` argument values to the file's contents.
fn expand_value(raw: &str) -> DomainResult<String> {
    match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            DomainError::Validation(format!("cannot read argument file {path}: {e}"))
        }),
        None => Ok(raw.to_string()),
    }
}

/// Coerce a CLI string to the parameter's declared wire type.
fn coerce(kind: ParamKind, raw: &str) -> DomainResult<serde_json::Value> {
    match kind {
        ParamKind::String => Ok(serde_json::Value::String(raw.to_string())),
        ParamKind::Number => {
            if let Ok(n) = raw.parse::<i64>() {
                Ok(serde_json::Value::from(n))
            } else {
                raw.parse::<f64>()
                    .map(serde_json::Value::from)
                    .map_err(|_| DomainError::Validation(format!("expected a number, got {raw}")))
            }
        }
        ParamKind::Boolean => raw
            .parse::<bool>()
            .map(serde_json::Value::Bool)
            .map_err(|_| DomainError::Validation(format!("expected true or false, got {raw}"))),
        ParamKind::Array => {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| DomainError::Validation(format!("expected a JSON array: {e}")))?;
            if value.is_array() {
                Ok(value)
            } else {
                Err(DomainError::validation("expected a JSON array"))
            }
        }
        ParamKind::Object => {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| DomainError::Validation(format!("expected a JSON object: {e}")))?;
            if value.is_object() {
                Ok(value)
            } else {
                Err(DomainError::validation("expected a JSON object"))
            }
        }
    }
}

/// Assemble the handler argument map from parsed CLI matches.
fn collect_args(spec: &CommandSpec, matches: &ArgMatches) -> DomainResult<CommandArgs> {
    let mut args = CommandArgs::new();
    for param in &spec.params {
        if let Some(raw) = matches.get_one::<String>(param.name) {
            let expanded = expand_value(raw)?;
            args.insert(param.name.to_string(), coerce(param.kind, &expanded)?);
        }
    }
    Ok(args)
}

/// Run one CLI subcommand; returns the process exit code.
pub async fn run(
    ctx: Arc<CommandContext>,
    cli_name: &str,
    matches: &ArgMatches,
    format: OutputFormat,
) -> i32 {
    let Some(spec) = registry().iter().find(|c| c.cli_name == cli_name) else {
        eprintln!("error: unknown command {cli_name}");
        return 1;
    };

    let args = match collect_args(spec, matches) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    match (spec.handler)(ctx, args).await {
        Ok(value) => {
            match format {
                OutputFormat::Human => println!("{}", (spec.format_human)(&value)),
                OutputFormat::Json => match serde_json::to_string_pretty(&value) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => {
                        eprintln!("error: {e}");
                        return 1;
                    }
                },
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_kebab_case() {
        assert_eq!(kebab_case("agentName"), "agent-name");
        assert_eq!(kebab_case("defaultLeaseDurationMinutes"), "default-lease-duration-minutes");
        assert_eq!(kebab_case("project"), "project");
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(ParamKind::Number, "42").unwrap(), serde_json::json!(42));
        assert_eq!(coerce(ParamKind::Number, "1.5").unwrap(), serde_json::json!(1.5));
        assert!(coerce(ParamKind::Number, "x").is_err());
        assert_eq!(coerce(ParamKind::Boolean, "true").unwrap(), serde_json::json!(true));
        assert!(coerce(ParamKind::Boolean, "yes").is_err());
        assert_eq!(
            coerce(ParamKind::Object, r#"{"x":"1"}"#).unwrap(),
            serde_json::json!({"x":"1"})
        );
        assert!(coerce(ParamKind::Object, "[1]").is_err());
        assert_eq!(
            coerce(ParamKind::Array, r#"[{"a":1}]"#).unwrap(),
            serde_json::json!([{"a":1}])
        );
    }

    #[test]
    fn test_expand_at_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "file contents").unwrap();
        file.flush().unwrap();

        let reference = format!("@{}", file.path().display());
        assert_eq!(expand_value(&reference).unwrap(), "file contents");
        assert_eq!(expand_value("plain").unwrap(), "plain");
        assert!(expand_value("@/no/such/file").is_err());
    }

    #[test]
    fn test_cli_builds_and_parses() {
        let cli = build_cli();
        let matches = cli
            .try_get_matches_from([
                "foreman",
                "create-project",
                "myproj",
                "a description",
                "--default-max-retries",
                "5",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "create-project");
        assert_eq!(sub.get_one::<String>("name").unwrap(), "myproj");
        assert_eq!(sub.get_one::<String>("defaultMaxRetries").unwrap(), "5");
    }

    #[test]
    fn test_every_command_has_a_subcommand() {
        let cli = build_cli();
        let names: Vec<&str> = cli.get_subcommands().map(Command::get_name).collect();
        for spec in registry() {
            assert!(names.contains(&spec.cli_name), "missing {}", spec.cli_name);
        }
    }

    #[test]
    fn test_required_positional_enforced() {
        let cli = build_cli();
        let err = cli.try_get_matches_from(["foreman", "get-project"]);
        assert!(err.is_err());
    }
}
