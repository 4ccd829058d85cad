//! Config command - show or edit configuration

use super::ProjectContext;
use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::Config;
use crate::error::{DockyardError, DockyardResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;
use toml_edit::{DocumentMut, Item};

/// Execute the config command
pub async fn execute(args: ConfigArgs, project: &ProjectContext) -> DockyardResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(&project.config)?,
        Some(ConfigAction::Path) => show_path(project),
        Some(ConfigAction::Set { key, value, local }) => {
            let path = if local {
                project.local_config_path()
            } else {
                project.global_path.clone()
            };
            set_value(&path, &key, &value).await?
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> DockyardResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(project: &ProjectContext) {
    println!("global: {}", project.global_path.display());
    match project.local_path {
        Some(ref local) => println!("local:  {}", local.display()),
        None => println!("local:  (none)"),
    }
}

async fn set_value(path: &Path, key: &str, value: &str) -> DockyardResult<()> {
    let ctx = UiContext::detect();

    let content = if path.exists() {
        fs::read_to_string(path)
            .await
            .map_err(|e| DockyardError::io(format!("reading {}", path.display()), e))?
    } else {
        String::new()
    };

    let updated = apply_setting(path, &content, key, value)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DockyardError::ConfigDirCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    fs::write(path, &updated)
        .await
        .map_err(|e| DockyardError::io(format!("writing {}", path.display()), e))?;

    ui::step_ok(&ctx, &format!("Set {} = {} in {}", key, value, path.display()));

    let config: Config = toml::from_str(&updated)?;
    if let Err(e) = config.validate(path) {
        ui::step_warn(&ctx, &e.to_string());
    }

    Ok(())
}

/// How a setting's value is written into the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Str,
    Bool,
    Int,
    /// Comma-separated list of strings
    List,
}

/// Look up the kind of a known key.
///
/// `toolchain.packages.*`, `dependencies.env.*` and `runtime.env.*` take
/// any name below them.
fn key_kind(parts: &[&str]) -> Option<ValueKind> {
    use ValueKind::*;

    let kind = match parts {
        ["general", "log_format"] => Str,
        ["general", "audit_log"] => Bool,

        ["toolchain", "components" | "install_command" | "update_command" | "clean_paths"] => List,
        ["toolchain", "packages", name] if !name.is_empty() => Str,

        ["dependencies", "lockfile" | "index_url" | "url_template"] => Str,
        ["dependencies", "jobs" | "timeout_secs"] => Int,
        ["dependencies", "install_command"] => List,
        ["dependencies", "env", name] if !name.is_empty() => Str,

        ["source", "dir"] => Str,
        ["source", "exclude"] => List,

        ["service", "entry" | "host"] => Str,
        ["service", "port" | "shutdown_timeout_secs" | "startup_grace_ms"] => Int,
        ["service", "command" | "module_extensions"] => List,

        ["image", "root"] => Str,
        ["image", "expose"] => Int,

        ["runtime", "unbuffered" | "no_bytecode"] => Bool,
        ["runtime", "unbuffered_var" | "no_bytecode_var" | "env_file"] => Str,
        ["runtime", "env", name] if !name.is_empty() => Str,

        _ => return None,
    };
    Some(kind)
}

/// Set `key` in a TOML document, keeping the rest of the file intact.
///
/// The result must still deserialize as a [`Config`].
fn apply_setting(path: &Path, content: &str, key: &str, value: &str) -> DockyardResult<String> {
    let parts: Vec<&str> = key.split('.').collect();
    let kind = key_kind(&parts).ok_or_else(|| {
        DockyardError::User(format!(
            "Unknown config key: {}. Run `dockyard config show` to see available keys",
            key
        ))
    })?;

    let mut doc: DocumentMut = content.parse().map_err(|e: toml_edit::TomlError| {
        DockyardError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    let (leaf, tables) = parts
        .split_last()
        .ok_or_else(|| DockyardError::User("Empty config key".to_string()))?;

    let mut current: &mut Item = doc.as_item_mut();
    for part in tables {
        let table = current
            .as_table_like_mut()
            .ok_or_else(|| DockyardError::User(format!("Expected table at key: {}", part)))?;
        current = table.entry(part).or_insert(toml_edit::table());
    }

    let table = current
        .as_table_like_mut()
        .ok_or_else(|| DockyardError::User(format!("Expected table for key: {}", key)))?;
    table.insert(leaf, parse_value(kind, key, value)?);

    let rendered = doc.to_string();
    toml::from_str::<Config>(&rendered).map_err(|e| DockyardError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(rendered)
}

fn parse_value(kind: ValueKind, key: &str, value: &str) -> DockyardResult<Item> {
    let item = match kind {
        ValueKind::Str => toml_edit::value(value),
        ValueKind::Bool => toml_edit::value(parse_bool(value)?),
        ValueKind::Int => {
            let n: i64 = value.parse().map_err(|_| {
                DockyardError::User(format!("Invalid number for {}: {}", key, value))
            })?;
            toml_edit::value(n)
        }
        ValueKind::List => {
            let items: toml_edit::Array = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            toml_edit::value(items)
        }
    };
    Ok(item)
}

fn parse_bool(value: &str) -> DockyardResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(DockyardError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}
