use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use moltslack_protocol::{EventPayload, SessionId, SessionState, SessionSummary};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, SubscriberId, Subscription};
use crate::config::{EngineConfig, shell_args};
use crate::error::MoltError;
use crate::provider::ProviderCommands;
use crate::summarize::{summarize_once, transcript_prompt};
use crate::task::TaskRunner;

const READ_CHUNK: usize = 4096;
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
/// Transcript characters fed to the summarizer.
pub const SUMMARY_TRANSCRIPT_CHARS: usize = 12_000;

/// Handles owned by the controller. Dropped (closed) on stop or exit.
struct PtyHandles {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Option<Box<dyn Child + Send + Sync>>,
}

/// State shared between a session and its read loop.
///
/// `alive` is only stored while `handles` is locked; it may be loaded
/// without the lock.
struct PtyShared {
    alive: AtomicBool,
    handles: Mutex<PtyHandles>,
}

impl PtyShared {
    fn lock(&self) -> MutexGuard<'_, PtyHandles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// One interactive shell on a pseudo-terminal, with its event bus.
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub working_directory: PathBuf,
    pub created_at: SystemTime,
    pid: Option<u32>,
    bus: Arc<EventBus>,
    pty: Arc<PtyShared>,
    tasks: TaskRunner,
    providers: ProviderCommands,
}

impl Session {
    /// Spawn the shell and start pumping its output into a fresh bus.
    pub fn start(
        id: SessionId,
        title: String,
        working_directory: PathBuf,
        config: &EngineConfig,
    ) -> Result<Arc<Self>, MoltError> {
        let pty_pair = native_pty_system()
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MoltError::PtyError(e.to_string()))?;

        let shell = config.resolve_shell();
        let mut cmd = CommandBuilder::new(&shell);
        cmd.args(shell_args(&shell));
        cmd.cwd(&working_directory);
        cmd.env("TERM", "xterm-256color");
        cmd.env("PROMPT", "moltslack% ");
        cmd.env("PS1", "moltslack$ ");

        let mut child = pty_pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| MoltError::PtyError(e.to_string()))?;
        // Only the child keeps the subordinate side open, so its exit ends the read loop.
        drop(pty_pair.slave);

        let io = pty_pair.master.try_clone_reader().and_then(|reader| {
            let writer = pty_pair.master.take_writer()?;
            Ok((reader, writer))
        });
        let (reader, writer) = match io {
            Ok(pair) => pair,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MoltError::PtyError(e.to_string()));
            }
        };

        let pid = child.process_id();
        let bus = Arc::new(EventBus::new(config.history_capacity, config.replay_limit));
        let pty = Arc::new(PtyShared {
            alive: AtomicBool::new(true),
            handles: Mutex::new(PtyHandles {
                master: Some(pty_pair.master),
                writer: Some(writer),
                child: Some(child),
            }),
        });

        let session = Arc::new(Self {
            tasks: TaskRunner::new(
                Arc::clone(&bus),
                config.providers.clone(),
                working_directory.clone(),
            ),
            providers: config.providers.clone(),
            id,
            title,
            working_directory,
            created_at: SystemTime::now(),
            pid,
            bus,
            pty,
        });

        session.bus.publish(EventPayload::Status {
            state: SessionState::Started,
        });

        let loop_pty = Arc::clone(&session.pty);
        let loop_bus = Arc::clone(&session.bus);
        let loop_id = session.id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("pty-{}", session.id))
            .spawn(move || read_loop(reader, loop_pty, loop_bus, loop_id));
        if let Err(e) = spawned {
            session.stop();
            return Err(MoltError::Io(e));
        }

        info!(
            session_id = %session.id,
            shell = %shell.display(),
            pid = ?session.pid,
            cwd = %session.working_directory.display(),
            "session started"
        );
        Ok(session)
    }

    pub fn is_alive(&self) -> bool {
        self.pty.is_alive()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn created_at_epoch_ms(&self) -> u64 {
        self.created_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            working_directory: self.working_directory.clone(),
            alive: self.is_alive(),
            created_at_epoch_ms: self.created_at_epoch_ms(),
            pid: self.pid,
        }
    }

    /// Send `text` to the shell and echo it as an `input` event.
    pub fn write(&self, text: &str) -> Result<(), MoltError> {
        let mut handles = self.pty.lock();
        if !self.pty.is_alive() {
            return Err(MoltError::SessionNotRunning(self.id.clone()));
        }
        let writer = handles
            .writer
            .as_mut()
            .ok_or_else(|| MoltError::SessionNotRunning(self.id.clone()))?;

        // Published before the bytes reach the shell so its echo cannot overtake it.
        self.bus.publish(EventPayload::Input {
            text: text.to_string(),
        });
        let written = writer
            .write_all(text.as_bytes())
            .and_then(|_| writer.flush());
        if let Err(e) = written {
            // A failed write ends the session; the read loop then reports `stopped`.
            warn!(session_id = %self.id, error = %e, "pty write failed");
            self.shutdown_locked(&mut handles);
            return Err(MoltError::PtyError(e.to_string()));
        }
        Ok(())
    }

    /// Set the terminal window size. Callers clamp `cols`/`rows` beforehand.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), MoltError> {
        let handles = self.pty.lock();
        if !self.pty.is_alive() {
            return Err(MoltError::SessionNotRunning(self.id.clone()));
        }
        let master = handles
            .master
            .as_ref()
            .ok_or_else(|| MoltError::SessionNotRunning(self.id.clone()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MoltError::PtyError(e.to_string()))?;
        debug!(session_id = %self.id, cols, rows, "resized");
        Ok(())
    }

    /// Terminate the shell and close the terminal. Idempotent.
    ///
    /// The read loop reaps the child and publishes the `stopped` status.
    pub fn stop(&self) {
        let mut handles = self.pty.lock();
        if self.shutdown_locked(&mut handles) {
            info!(session_id = %self.id, "session stop requested");
        }
    }

    /// Flip `alive`, signal the shell and close the terminal. Returns false if
    /// the session was already dead.
    fn shutdown_locked(&self, handles: &mut PtyHandles) -> bool {
        if !self.pty.alive.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(pid) = self.pid {
            terminate(pid);
        }
        handles.writer.take();
        handles.master.take();
        true
    }

    pub fn subscribe(&self, replay: bool) -> Subscription {
        self.bus.subscribe(replay)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.bus.unsubscribe(subscription);
    }

    pub fn unsubscribe_id(&self, id: SubscriberId) {
        self.bus.unsubscribe_id(id);
    }

    /// Post text (e.g. an upload notice) to observers as terminal output.
    pub fn publish_output(&self, text: impl Into<String>) {
        self.bus.publish(EventPayload::Output { text: text.into() });
    }

    /// Start a provider task in the background. See [`TaskRunner::run`].
    pub fn run_task(&self, provider: &str, prompt: &str) -> Result<(), MoltError> {
        self.tasks.run(provider, prompt)
    }

    /// Input and output text in publish order, keeping the newest `max_chars`.
    pub fn recent_transcript(&self, max_chars: usize) -> String {
        let full = self.bus.fold_history(String::new(), |mut acc, event| {
            if let EventPayload::Input { text } | EventPayload::Output { text } = &event.payload {
                acc.push_str(text);
            }
            acc
        });
        keep_last_chars(full, max_chars)
    }

    /// Summarize the recent transcript with a one-shot provider run.
    pub async fn summarize(&self, provider: &str, timeout: Duration) -> Result<String, MoltError> {
        let transcript = self.recent_transcript(SUMMARY_TRANSCRIPT_CHARS);
        let prompt = transcript_prompt(&self.title, &transcript);
        summarize_once(
            &self.providers,
            provider,
            &prompt,
            &self.working_directory,
            timeout,
        )
        .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn keep_last_chars(text: String, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}

/// Interactive shells ignore SIGTERM, so follow it with a hangup.
fn terminate(pid: u32) {
    for signal in [libc::SIGTERM, libc::SIGHUP] {
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc != 0 {
            // ESRCH: the child already exited.
            debug!(pid, error = %std::io::Error::last_os_error(), "signal not delivered");
            return;
        }
    }
}

/// Pump PTY output onto the bus until EOF, an I/O error, or stop.
fn read_loop(
    mut reader: Box<dyn Read + Send>,
    pty: Arc<PtyShared>,
    bus: Arc<EventBus>,
    session_id: SessionId,
) {
    let mut buf = [0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if !pty.is_alive() {
                    break;
                }
                let text = decode_chunk(&mut pending, &buf[..n]);
                if !text.is_empty() {
                    bus.publish(EventPayload::Output { text });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO is the normal end of a pty once the shell has exited.
                debug!(session_id = %session_id, error = %e, "pty read ended");
                break;
            }
        }
    }

    let child = {
        let mut handles = pty.lock();
        let was_alive = pty.alive.swap(false, Ordering::AcqRel);
        if was_alive && !pending.is_empty() {
            bus.publish(EventPayload::Output {
                text: String::from_utf8_lossy(&pending).into_owned(),
            });
        }
        handles.writer.take();
        handles.master.take();
        handles.child.take()
    };
    if let Some(child) = child {
        reap(child, &session_id);
    }

    bus.publish(EventPayload::Status {
        state: SessionState::Stopped,
    });
    info!(session_id = %session_id, "session stopped");
}

fn reap(mut child: Box<dyn Child + Send + Sync>, session_id: &str) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(session_id, exit_code = status.exit_code(), "shell exited");
        }
        Ok(None) => {
            if let Err(e) = child.kill() {
                warn!(session_id, error = %e, "failed to kill shell");
            }
            let _ = child.wait();
        }
        Err(e) => warn!(session_id, error = %e, "failed to query shell status"),
    }
}

/// Decode `data` appended to `pending`, holding back an incomplete trailing
/// UTF-8 sequence for the next read. Invalid bytes become U+FFFD.
fn decode_chunk(pending: &mut Vec<u8>, data: &[u8]) -> String {
    pending.extend_from_slice(data);
    let ready = pending.len() - incomplete_tail(pending);
    let text = String::from_utf8_lossy(&pending[..ready]).into_owned();
    pending.drain(..ready);
    text
}

fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = match b {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
