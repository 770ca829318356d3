// File: manager/src/commands.rs
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::errors::EngineError;

/// Lines of stderr kept for the error message of a failed command
const STDERR_TAIL_LINES: usize = 20;

/// Run an external tool to completion, draining both streams while it runs.
///
/// Stdout is returned on success. A non-zero exit becomes
/// `EngineError::CommandFailed` carrying the tail of stderr. Environment
/// values are passed to the child only, so secrets never appear in argv.
pub async fn run_command<I, S>(
    program: &str,
    args: I,
    envs: &[(&str, &str)],
) -> Result<String, EngineError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = AsyncCommand::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }

    debug!("Spawning {}", program);
    let mut child = command.spawn().map_err(|e| EngineError::Spawn {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| EngineError::Spawn {
        program: program.to_string(),
        reason: "stdout not captured".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| EngineError::Spawn {
        program: program.to_string(),
        reason: "stderr not captured".to_string(),
    })?;

    let stdout_name = program.to_string();
    let stdout_handle = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut collected = String::new();
        let mut line = String::new();
        while let Ok(bytes_read) = reader.read_line(&mut line).await {
            if bytes_read == 0 {
                break;
            }
            debug!("{} stdout: {}", stdout_name, line.trim_end());
            collected.push_str(&line);
            line.clear();
        }
        collected
    });

    let stderr_name = program.to_string();
    let stderr_handle = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut tail: Vec<String> = Vec::new();
        let mut line = String::new();
        while let Ok(bytes_read) = reader.read_line(&mut line).await {
            if bytes_read == 0 {
                break;
            }
            debug!("{} stderr: {}", stderr_name, line.trim_end());
            if tail.len() == STDERR_TAIL_LINES {
                tail.remove(0);
            }
            tail.push(line.trim_end().to_string());
            line.clear();
        }
        tail.join("\n")
    });

    let status = child.wait().await?;
    let (stdout, stderr) = tokio::join!(stdout_handle, stderr_handle);
    let stdout = stdout.unwrap_or_default();
    let stderr = stderr.unwrap_or_default();

    if status.success() {
        Ok(stdout)
    } else {
        Err(EngineError::CommandFailed {
            program: program.to_string(),
            code: status.code().unwrap_or(-1),
            stderr,
        })
    }
}
