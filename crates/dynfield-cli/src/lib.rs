//! Dynfield command line
//!
//! Loads a document file into a [`MemoryBackend`], runs one subcommand
//! against the config or variable store, and writes the document back
//! after successful mutations.

pub mod config;
pub mod document;

pub use config::CliConfig;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dynfield_eval::{
    EvaluationClient, EvaluationRequest, EvaluationResponse, Interpreter, InterpreterError, RefreshReport,
};
use dynfield_store::{
    ApplyOutcome, ConfigKind, Entity, EntityKind, Field, FieldBackend, FieldStore, HistoryFilter,
    KeyRenameCoordinator, MemoryBackend, VariableKind, PRIMARY_FIELD,
};
use dynfield_value::time::{format_timestamp, parse_timestamp};
use dynfield_value::{TypedValue, ValueType};
use serde_json::json;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const MUTATING: [&str; 6] = ["set", "set-expr", "refresh", "rename", "delete", "clear-history"];

/// Stand-in used when no interpreter is configured
#[derive(Debug)]
struct Unconfigured;

#[async_trait::async_trait]
impl Interpreter for Unconfigured {
    async fn evaluate(&self, _request: &EvaluationRequest) -> Result<EvaluationResponse, InterpreterError> {
        Err(InterpreterError::Transport(
            "no interpreter configured; add an [interpreter] section to the config file".into(),
        ))
    }
}

fn key_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).required(true).help(help)
}

fn field_arg() -> Arg {
    Arg::new("field")
        .long("field")
        .default_value(PRIMARY_FIELD)
        .help("Field name")
}

fn type_arg() -> Arg {
    Arg::new("type")
        .long("type")
        .value_parser(|s: &str| s.parse::<ValueType>())
        .help("Type used when the entity or field has to be created")
}

/// Command line definition
#[must_use]
pub fn command() -> Command {
    Command::new("dynfield")
        .version(VERSION)
        .about("Inspect and edit typed config entries and variables")
        .subcommand_required(true)
        .arg(
            Arg::new("file")
                .long("file")
                .short('f')
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Document file (.json, .yaml or .yml)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("kind")
                .long("kind")
                .short('k')
                .value_parser(["config", "variable"])
                .default_value("variable")
                .help("Entity kind to operate on"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print JSON instead of text"),
        )
        .subcommand(Command::new("list").about("List every entity"))
        .subcommand(
            Command::new("get")
                .about("Show one field")
                .arg(key_arg("key", "Entity key"))
                .arg(field_arg()),
        )
        .subcommand(
            Command::new("set")
                .about("Write a static literal, creating the entity or field when --type is given")
                .arg(key_arg("key", "Entity key"))
                .arg(key_arg("literal", "Literal value"))
                .arg(field_arg())
                .arg(type_arg()),
        )
        .subcommand(
            Command::new("set-expr")
                .about("Write an expression and evaluate it")
                .arg(key_arg("key", "Entity key"))
                .arg(key_arg("expression", "Expression text"))
                .arg(field_arg())
                .arg(type_arg())
                .arg(
                    Arg::new("no-eval")
                        .long("no-eval")
                        .action(ArgAction::SetTrue)
                        .help("Store the expression without evaluating it"),
                ),
        )
        .subcommand(
            Command::new("refresh")
                .about("Re-evaluate one dynamic field, or all of them without a key")
                .arg(Arg::new("key").help("Entity key"))
                .arg(field_arg()),
        )
        .subcommand(
            Command::new("rename")
                .about("Rename an entity, keeping its fields and history")
                .arg(key_arg("old", "Current key"))
                .arg(key_arg("new", "New key")),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete an entity, or one auxiliary field with --field")
                .arg(key_arg("key", "Entity key"))
                .arg(Arg::new("field").long("field").help("Auxiliary field to delete")),
        )
        .subcommand(
            Command::new("history")
                .about("Show the evaluation history of a field")
                .arg(key_arg("key", "Entity key"))
                .arg(field_arg()),
        )
        .subcommand(
            Command::new("clear-history")
                .about("Remove evaluation history records")
                .arg(Arg::new("key").long("key").help("Only this entity"))
                .arg(Arg::new("field").long("field").help("Only this field name"))
                .arg(
                    Arg::new("before")
                        .long("before")
                        .value_parser(|s: &str| parse_timestamp(s))
                        .help("Only records older than this RFC 3339 instant"),
                ),
        )
}

/// Parse `args` and run them
///
/// # Errors
/// Argument, document, configuration or operation failures
pub async fn run<I, T>(args: I) -> anyhow::Result<String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    let config = load_config(&matches)?;
    run_with(&matches, &config).await
}

/// Configuration named by `--config`, or the defaults
///
/// # Errors
/// When the file cannot be read or parsed
pub fn load_config(matches: &ArgMatches) -> anyhow::Result<CliConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => CliConfig::load(path),
        None => Ok(CliConfig::default()),
    }
}

/// Run parsed arguments and return what should be printed
///
/// # Errors
/// Document or operation failures; the document is left unchanged on error
pub async fn run_with(matches: &ArgMatches, config: &CliConfig) -> anyhow::Result<String> {
    let path = matches.get_one::<PathBuf>("file").context("--file is required")?;
    let (name, args) = matches.subcommand().context("a subcommand is required")?;
    let json = matches.get_flag("json");

    let memory = Arc::new(MemoryBackend::from_document(document::load(path)?));
    let backend: Arc<dyn FieldBackend> = memory.clone();
    let interpreter: Arc<dyn Interpreter> = match &config.interpreter {
        Some(process) => Arc::new(process.clone()),
        None => Arc::new(Unconfigured),
    };

    let output = match matches.get_one::<String>("kind").map(String::as_str) {
        Some("config") => {
            Session::<ConfigKind>::open(backend, interpreter, config)
                .await?
                .execute(name, args, json)
                .await?
        }
        _ => {
            Session::<VariableKind>::open(backend, interpreter, config)
                .await?
                .execute(name, args, json)
                .await?
        }
    };

    if MUTATING.contains(&name) {
        document::save(path, &memory.document())?;
        info!(path = %path.display(), "document saved");
    }
    Ok(output)
}

struct Session<K: EntityKind> {
    store: Arc<FieldStore<K>>,
    client: EvaluationClient<K>,
    renamer: KeyRenameCoordinator<K>,
}

impl<K: EntityKind> Session<K> {
    async fn open(
        backend: Arc<dyn FieldBackend>,
        interpreter: Arc<dyn Interpreter>,
        config: &CliConfig,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(FieldStore::open(backend).await?);
        Ok(Self {
            client: EvaluationClient::new(store.clone(), interpreter).with_config(config.eval.clone()),
            renamer: KeyRenameCoordinator::new(store.clone()),
            store,
        })
    }

    async fn execute(&self, name: &str, args: &ArgMatches, json: bool) -> anyhow::Result<String> {
        let text = |id: &str| args.get_one::<String>(id).map(String::as_str);
        let required = |id: &str| text(id).with_context(|| format!("missing <{id}>"));

        match name {
            "list" => {
                if json {
                    return Ok(serde_json::to_string_pretty(&self.store.list())?);
                }
                let mut lines = Vec::new();
                for key in self.store.list().keys() {
                    lines.extend(self.store.fields(key)?.iter().map(describe));
                }
                Ok(lines.join("\n"))
            }
            "get" => {
                let field = self.store.get(required("key")?, required("field")?)?;
                Ok(render(&field, json))
            }
            "set" => {
                let field = self
                    .set_literal(required("key")?, required("field")?, required("literal")?, args.get_one("type"))
                    .await?;
                Ok(render(&field, json))
            }
            "set-expr" => {
                let field = self
                    .set_expression(
                        required("key")?,
                        required("field")?,
                        required("expression")?,
                        args.get_one("type"),
                        args.get_flag("no-eval"),
                    )
                    .await?;
                Ok(render(&field, json))
            }
            "refresh" => match text("key") {
                Some(key) => {
                    let field_name = required("field")?;
                    match self.client.refresh(key, field_name).await? {
                        ApplyOutcome::Applied(field) => Ok(render(&field, json)),
                        ApplyOutcome::Discarded(reason) => bail!("result for '{key}.{field_name}' discarded: {reason:?}"),
                    }
                }
                None => {
                    let reports = self.client.refresh_all().await;
                    Ok(if json {
                        serde_json::to_string_pretty(&reports.iter().map(report_json).collect::<Vec<_>>())?
                    } else {
                        reports.iter().map(report_line).collect::<Vec<_>>().join("\n")
                    })
                }
            },
            "rename" => {
                let (old, new) = (required("old")?, required("new")?);
                self.renamer.rename(old, new).await?;
                Ok(if json {
                    json!({ "renamed": old, "to": new }).to_string()
                } else {
                    format!("renamed {old} -> {new}")
                })
            }
            "delete" => {
                let key = required("key")?;
                match text("field") {
                    Some(field_name) => {
                        self.store.delete_field(key, field_name).await?;
                        Ok(format!("deleted {key}.{field_name}"))
                    }
                    None => {
                        self.store.delete_entity(key).await?;
                        Ok(format!("deleted {key}"))
                    }
                }
            }
            "history" => {
                let records = self.client.get_history(required("key")?, required("field")?)?;
                if json {
                    return Ok(serde_json::to_string_pretty(&records)?);
                }
                Ok(records
                    .iter()
                    .map(|r| format!("{}  {}", format_timestamp(r.timestamp), r.value.to_literal()))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            "clear-history" => {
                let mut filter = HistoryFilter::all().component(self.store.kind());
                if let Some(key) = text("key") {
                    filter = filter.key(key);
                }
                if let Some(field_name) = text("field") {
                    filter = filter.field(field_name);
                }
                if let Some(cutoff) = args.get_one::<DateTime<Utc>>("before") {
                    filter = filter.before(*cutoff);
                }
                let removed = self.client.clear_history(&filter).await?;
                Ok(if json {
                    json!({ "removed": removed }).to_string()
                } else {
                    format!("removed {removed} history records")
                })
            }
            other => bail!("unknown subcommand {other}"),
        }
    }

    async fn set_literal(
        &self,
        key: &str,
        field_name: &str,
        literal: &str,
        kind: Option<&ValueType>,
    ) -> anyhow::Result<Field> {
        if let Some(created) = self.create_missing(key, field_name, kind, |k| TypedValue::from_literal(k, literal)).await? {
            return Ok(created);
        }
        let current = self.store.get(key, field_name)?;
        let field = if current.value.is_dynamic() {
            self.store.switch_to_static(key, field_name, literal).await?
        } else {
            self.store.set_static_value(key, field_name, literal).await?
        };
        Ok(field)
    }

    async fn set_expression(
        &self,
        key: &str,
        field_name: &str,
        expression: &str,
        kind: Option<&ValueType>,
        no_eval: bool,
    ) -> anyhow::Result<Field> {
        let created = self
            .create_missing(key, field_name, kind, |k| TypedValue::new_dynamic(k, expression))
            .await?;

        if no_eval {
            if let Some(field) = created {
                return Ok(field);
            }
            let field = if self.store.get(key, field_name)?.value.is_dynamic() {
                self.store.set_dynamic_expression(key, field_name, expression).await?
            } else {
                self.store.switch_to_dynamic(key, field_name, expression).await?
            };
            return Ok(field);
        }
        if created.is_some() {
            return match self.client.refresh(key, field_name).await? {
                ApplyOutcome::Applied(field) => Ok(field),
                ApplyOutcome::Discarded(reason) => bail!("result for '{key}.{field_name}' discarded: {reason:?}"),
            };
        }
        Ok(self.client.commit_expression(key, field_name, expression).await?)
    }

    /// Create the entity or auxiliary field when absent and a type was given
    async fn create_missing(
        &self,
        key: &str,
        field_name: &str,
        kind: Option<&ValueType>,
        build: impl FnOnce(ValueType) -> dynfield_value::ValueResult<TypedValue>,
    ) -> anyhow::Result<Option<Field>> {
        let exists = self.store.contains(key);
        if exists && self.store.get(key, field_name).is_ok() {
            return Ok(None);
        }
        let Some(&kind) = kind else {
            let what = if exists { format!("{key}.{field_name}") } else { key.to_string() };
            bail!("'{what}' does not exist; pass --type to create it");
        };

        let value = build(kind)?;
        if exists {
            return Ok(Some(self.store.add_field(key, field_name, value).await?));
        }
        if field_name != PRIMARY_FIELD {
            bail!("create '{key}' with its primary field before adding '{field_name}'");
        }
        self.store.create_entity(key, Entity::new(value)).await?;
        Ok(Some(self.store.get(key, field_name)?))
    }
}

fn describe(field: &Field) -> String {
    let mut line = format!("{}.{} = {}", field.key, field.field_name, field.value.to_literal());
    if let Some(expression) = field.value.original() {
        let _ = write!(line, "  <- {expression}");
    }
    if field.stale {
        line.push_str("  (stale)");
    }
    line
}

fn field_json(field: &Field) -> serde_json::Value {
    json!({
        "key": field.key,
        "field": field.field_name,
        "value": field.value,
        "stale": field.stale,
    })
}

fn render(field: &Field, json: bool) -> String {
    if json {
        field_json(field).to_string()
    } else {
        describe(field)
    }
}

fn report_line(report: &RefreshReport) -> String {
    let status = match &report.outcome {
        Ok(ApplyOutcome::Applied(field)) => format!("= {}", field.value.to_literal()),
        Ok(ApplyOutcome::Discarded(reason)) => format!("discarded ({reason:?})"),
        Err(err) => format!("error: {err}"),
    };
    format!("{}.{} {status}", report.key, report.field_name)
}

fn report_json(report: &RefreshReport) -> serde_json::Value {
    match &report.outcome {
        Ok(ApplyOutcome::Applied(field)) => field_json(field),
        Ok(ApplyOutcome::Discarded(reason)) => {
            json!({ "key": report.key, "field": report.field_name, "discarded": format!("{reason:?}") })
        }
        Err(err) => json!({ "key": report.key, "field": report.field_name, "error": err.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn describe_marks_dynamic_and_stale() {
        let field = Field {
            key: "sum".into(),
            field_name: "value".into(),
            value: TypedValue::new_dynamic(ValueType::Integer, "(+ 1 2)").unwrap(),
            stale: true,
        };
        assert_eq!(describe(&field), "sum.value = 0  <- (+ 1 2)  (stale)");
    }
}
