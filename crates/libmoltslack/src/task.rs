//! Drives a provider CLI in the background and streams what it prints onto a
//! session bus.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use moltslack_protocol::{ActivityStage, ChatRole, EventPayload};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::MoltError;
use crate::normalize::normalize_line;
use crate::provider::{Provider, ProviderCommands};

/// Starts provider tasks that publish into one session's bus.
#[derive(Clone)]
pub struct TaskRunner {
    bus: Arc<EventBus>,
    commands: ProviderCommands,
    cwd: PathBuf,
}

impl TaskRunner {
    pub fn new(bus: Arc<EventBus>, commands: ProviderCommands, cwd: PathBuf) -> Self {
        Self { bus, commands, cwd }
    }

    /// Validate and launch a task. Returns once the `start` activity is
    /// published; completion is observable only through the bus.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(&self, provider: &str, prompt: &str) -> Result<(), MoltError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(MoltError::EmptyPrompt);
        }
        let provider: Provider = provider.parse()?;

        self.bus.publish(activity(provider, ActivityStage::Start, "task_started"));

        let mut command = Command::new(self.commands.program(provider));
        command
            .args(provider.args(prompt))
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(provider = %provider, cwd = %self.cwd.display(), "task started");
        tokio::spawn(drive(Arc::clone(&self.bus), provider, command));
        Ok(())
    }
}

fn activity(provider: Provider, stage: ActivityStage, detail: impl Into<String>) -> EventPayload {
    EventPayload::Activity {
        provider: provider.to_string(),
        stage,
        detail: detail.into(),
    }
}

fn chat(provider: Provider, role: ChatRole, text: impl Into<String>) -> EventPayload {
    EventPayload::Chat {
        role,
        text: text.into(),
        provider: provider.to_string(),
    }
}

async fn drive(bus: Arc<EventBus>, provider: Provider, mut command: Command) {
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(provider = %provider, "provider CLI not found");
            bus.publish(chat(
                provider,
                ChatRole::System,
                format!("{provider} CLI not found in PATH."),
            ));
            bus.publish(activity(provider, ActivityStage::Error, "cli_not_found"));
            bus.publish(activity(provider, ActivityStage::Finish, "cli_not_found"));
            return;
        }
        Err(err) => {
            warn!(provider = %provider, error = %err, "failed to start task");
            bus.publish(chat(
                provider,
                ChatRole::System,
                format!("Failed to start task: {err}"),
            ));
            bus.publish(activity(provider, ActivityStage::Error, err.to_string()));
            bus.publish(activity(provider, ActivityStage::Finish, "spawn_failed"));
            return;
        }
    };

    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(drain_stderr(Arc::clone(&bus), provider, stderr)));
    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(drain_stdout(Arc::clone(&bus), provider, stdout)));

    let assistant_emitted = match stdout_task {
        Some(handle) => handle.await.unwrap_or(false),
        None => false,
    };
    let stderr_lines = match stderr_task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };

    let code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(-1),
        Err(err) => {
            warn!(provider = %provider, error = %err, "failed to wait for task");
            -1
        }
    };

    if code != 0 && !assistant_emitted {
        let detail = stderr_lines
            .into_iter()
            .next()
            .unwrap_or_else(|| format!("{provider} exited with code {code}"));
        bus.publish(chat(provider, ChatRole::System, detail));
    }
    bus.publish(activity(
        provider,
        ActivityStage::Finish,
        format!("exit_code={code}"),
    ));
    info!(provider = %provider, exit_code = code, "task finished");
}

/// Read one line, decoding invalid UTF-8 permissively. `None` at EOF or on error.
pub(crate) async fn next_line<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => Some(String::from_utf8_lossy(buf).into_owned()),
        Err(err) => {
            debug!(error = %err, "provider stream read failed");
            None
        }
    }
}

async fn drain_stderr<R>(bus: Arc<EventBus>, provider: Provider, stderr: R) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    while let Some(line) = next_line(&mut reader, &mut buf).await {
        let msg = line.trim();
        if msg.is_empty() {
            continue;
        }
        bus.publish(activity(provider, ActivityStage::Stderr, msg));
        lines.push(msg.to_string());
    }
    lines
}

/// Returns whether any assistant chat was published.
async fn drain_stdout<R>(bus: Arc<EventBus>, provider: Provider, stdout: R) -> bool
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut assistant_emitted = false;
    while let Some(line) = next_line(&mut reader, &mut buf).await {
        let parsed = normalize_line(provider, &line);
        if let Some(detail) = parsed.activity {
            bus.publish(activity(provider, ActivityStage::Stream, detail));
        }
        if let Some(text) = parsed.thought {
            bus.publish(EventPayload::Thought {
                provider: provider.to_string(),
                text,
            });
        }
        if let Some(text) = parsed.chat {
            assistant_emitted = true;
            bus.publish(chat(provider, ChatRole::Assistant, text));
        }
    }
    assistant_emitted
}
