//! One-shot, non-streaming provider runs used to summarize transcripts.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::MoltError;
use crate::normalize::normalize_line;
use crate::provider::{Provider, ProviderCommands};

/// Run `provider` on `prompt` to completion and return its chat output.
///
/// Exactly one of a non-empty summary or an error is returned. The child is
/// killed if `timeout` elapses first.
pub async fn summarize_once(
    commands: &ProviderCommands,
    provider: &str,
    prompt: &str,
    working_directory: &Path,
    timeout: Duration,
) -> Result<String, MoltError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(MoltError::EmptyPrompt);
    }
    let provider: Provider = provider.parse()?;

    let mut command = Command::new(commands.program(provider));
    command
        .args(provider.args(prompt))
        .current_dir(working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(provider = %provider, timeout_secs = timeout.as_secs(), "running summarizer");
    let output = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => return Err(MoltError::Timeout(timeout)),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(MoltError::CliNotFound(provider.to_string()));
        }
        Ok(Err(err)) => return Err(MoltError::Io(err)),
        Ok(Ok(output)) => output,
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let chats: Vec<String> = stdout
        .lines()
        .filter_map(|line| normalize_line(provider, line).chat)
        .collect();
    if !chats.is_empty() {
        info!(provider = %provider, lines = chats.len(), "summary produced");
        return Ok(chats.join("\n"));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if let Some(first) = stderr.lines().map(str::trim).find(|l| !l.is_empty()) {
        return Err(MoltError::ProviderStderr(first.to_string()));
    }
    match output.status.code() {
        Some(0) => Err(MoltError::NoSummary),
        code => Err(MoltError::ProviderExit {
            provider: provider.to_string(),
            code: code.unwrap_or(-1),
        }),
    }
}

/// Build the summarization prompt for a session transcript.
pub fn transcript_prompt(title: &str, transcript: &str) -> String {
    format!(
        "Summarize the following terminal session titled \"{title}\".\n\
         Describe what was attempted, what succeeded, what failed, and any\n\
         follow-ups. Reply with a short plain-text summary only.\n\n\
         --- transcript ---\n{transcript}\n--- end transcript ---"
    )
}
