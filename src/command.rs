//! External command execution

use crate::error::{DockyardError, DockyardResult};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Substitute `{key}` placeholders in every argument
pub fn substitute(argv: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    argv.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}

/// Run `argv` to completion, failing with its stderr on a non-zero exit
pub async fn exec(argv: &[String], env: &BTreeMap<String, String>) -> DockyardResult<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| DockyardError::Internal("empty command".to_string()))?;
    let command_line = argv.join(" ");
    debug!("Executing: {}", command_line);

    let output = Command::new(program)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| DockyardError::command_failed(&command_line, e))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(DockyardError::command_exec(command_line, stderr.trim()))
    }
}
