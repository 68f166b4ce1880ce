//! Task runner and summarizer tests driven by fake provider CLIs.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use libmoltslack::task::TaskRunner;
use libmoltslack::{EventBus, MoltError, ProviderCommands, Subscription, summarize_once};
use moltslack_protocol::{ActivityStage, ChatRole, Event, EventPayload};

/// Write an executable `/bin/sh` script standing in for a provider CLI.
fn fake_cli(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn commands_with(claude: PathBuf, codex: PathBuf) -> ProviderCommands {
    ProviderCommands { claude, codex }
}

async fn summarize_with(
    claude: PathBuf,
    dir: &Path,
    timeout: Duration,
) -> Result<String, MoltError> {
    let commands = commands_with(claude, "codex".into());
    summarize_once(&commands, "claude", "s", dir, timeout).await
}

async fn run_to_finish(
    runner: &TaskRunner,
    sub: &mut Subscription,
    provider: &str,
    prompt: &str,
) -> Vec<Event> {
    runner.run(provider, prompt).expect("task accepted");
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), sub.recv())
            .await
            .expect("timed out waiting for finish")
            .expect("bus closed");
        let done = matches!(
            event.payload,
            EventPayload::Activity {
                stage: ActivityStage::Finish,
                ..
            }
        );
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn chats(events: &[Event]) -> Vec<(ChatRole, String)> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Chat { role, text, .. } => Some((*role, text.clone())),
            _ => None,
        })
        .collect()
}

fn finish_detail(events: &[Event]) -> String {
    match &events.last().unwrap().payload {
        EventPayload::Activity { detail, .. } => detail.clone(),
        other => panic!("last event was not an activity: {other:?}"),
    }
}

fn setup(claude_body: &str, codex_body: &str) -> (tempfile::TempDir, Arc<EventBus>, TaskRunner) {
    let dir = tempfile::tempdir().unwrap();
    let claude = fake_cli(dir.path(), "claude", claude_body);
    let codex = fake_cli(dir.path(), "codex", codex_body);
    let bus = Arc::new(EventBus::default());
    let runner = TaskRunner::new(
        Arc::clone(&bus),
        commands_with(claude, codex),
        dir.path().to_path_buf(),
    );
    (dir, bus, runner)
}

#[tokio::test]
async fn claude_stream_yields_thought_then_single_chat() {
    let (_dir, bus, runner) = setup(
        r#"echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"All good."}]}}'
echo '{"type":"result","result":"All good."}'"#,
        "exit 0",
    );
    let mut sub = bus.subscribe(false);
    let events = run_to_finish(&runner, &mut sub, "claude", "check it").await;

    assert!(matches!(
        &events[0].payload,
        EventPayload::Activity { stage: ActivityStage::Start, detail, .. } if detail == "task_started"
    ));
    assert!(events.iter().any(|e| matches!(
        &e.payload,
        EventPayload::Thought { text, .. } if text == "All good."
    )));
    assert_eq!(chats(&events), vec![(ChatRole::Assistant, "All good.".to_string())]);
    assert!(events.iter().any(|e| matches!(
        &e.payload,
        EventPayload::Activity { stage: ActivityStage::Stream, detail, .. } if detail == "claude:system"
    )));
    assert_eq!(finish_detail(&events), "exit_code=0");
}

#[tokio::test]
async fn stderr_line_surfaces_when_task_fails_silently() {
    let (_dir, bus, runner) = setup("echo 'auth failed' >&2\nexit 1", "exit 0");
    let mut sub = bus.subscribe(false);
    let events = run_to_finish(&runner, &mut sub, "claude", "hi").await;

    assert!(events.iter().any(|e| matches!(
        &e.payload,
        EventPayload::Activity { stage: ActivityStage::Stderr, detail, .. } if detail == "auth failed"
    )));
    assert_eq!(chats(&events), vec![(ChatRole::System, "auth failed".to_string())]);
    let n = events.len();
    assert!(matches!(
        &events[n - 2].payload,
        EventPayload::Chat { role: ChatRole::System, .. }
    ));
    assert_eq!(finish_detail(&events), "exit_code=1");
}

#[tokio::test]
async fn silent_failure_reports_exit_code() {
    let (_dir, bus, runner) = setup("exit 3", "exit 0");
    let mut sub = bus.subscribe(false);
    let events = run_to_finish(&runner, &mut sub, "claude", "hi").await;
    assert_eq!(
        chats(&events),
        vec![(ChatRole::System, "claude exited with code 3".to_string())]
    );
    assert_eq!(finish_detail(&events), "exit_code=3");
}

#[tokio::test]
async fn failure_after_an_answer_adds_no_system_chat() {
    let (_dir, bus, runner) = setup(
        "exit 0",
        r#"echo '{"type":"item.completed","item":{"text":"partial answer"}}'
echo 'boom' >&2
exit 2"#,
    );
    let mut sub = bus.subscribe(false);
    let events = run_to_finish(&runner, &mut sub, "codex", "hi").await;
    assert_eq!(
        chats(&events),
        vec![(ChatRole::Assistant, "partial answer".to_string())]
    );
    assert_eq!(finish_detail(&events), "exit_code=2");
}

#[tokio::test]
async fn codex_receives_prompt_and_runs_in_session_directory() {
    let (dir, bus, runner) = setup(
        "exit 0",
        r#"printf '{"type":"item.completed","item":{"text":"%s in %s"}}\n' "$3" "$(pwd)""#,
    );
    let mut sub = bus.subscribe(false);
    let events = run_to_finish(&runner, &mut sub, "codex", "  list files  ").await;
    let expected = format!(
        "list files in {}",
        dir.path().canonicalize().unwrap().display()
    );
    let got = chats(&events);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, ChatRole::Assistant);
    // pwd may report the non-canonical temp path.
    assert!(got[0].1.starts_with("list files in "));
    assert!(
        got[0].1 == expected
            || got[0].1 == format!("list files in {}", dir.path().display())
    );
}

#[tokio::test]
async fn missing_cli_still_finishes() {
    let bus = Arc::new(EventBus::default());
    let runner = TaskRunner::new(
        Arc::clone(&bus),
        commands_with("/no/such/claude".into(), "/no/such/codex".into()),
        std::env::temp_dir(),
    );
    let mut sub = bus.subscribe(false);
    let events = run_to_finish(&runner, &mut sub, "claude", "hi").await;

    assert_eq!(
        chats(&events),
        vec![(ChatRole::System, "claude CLI not found in PATH.".to_string())]
    );
    assert!(events.iter().any(|e| matches!(
        &e.payload,
        EventPayload::Activity { stage: ActivityStage::Error, detail, .. } if detail == "cli_not_found"
    )));
    assert_eq!(finish_detail(&events), "cli_not_found");
}

#[tokio::test]
async fn unsupported_provider_publishes_nothing() {
    let (_dir, bus, runner) = setup("exit 0", "exit 0");
    let err = runner.run("unknown-provider", "hi").unwrap_err();
    assert!(matches!(err, MoltError::UnsupportedProvider(_)));
    assert_eq!(bus.history_len(), 0);
}

#[tokio::test]
async fn concurrent_tasks_each_finish() {
    let (_dir, bus, runner) = setup(
        r#"echo '{"type":"result","result":"one"}'"#,
        r#"echo '{"type":"item.completed","item":{"text":"two"}}'"#,
    );
    let mut sub = bus.subscribe(false);
    runner.run("claude", "a").unwrap();
    runner.run("codex", "b").unwrap();

    let mut finishes = 0;
    let mut answers = Vec::new();
    while finishes < 2 {
        let event = tokio::time::timeout(Duration::from_secs(10), sub.recv())
            .await
            .unwrap()
            .unwrap();
        match event.payload {
            EventPayload::Activity {
                stage: ActivityStage::Finish,
                ..
            } => finishes += 1,
            EventPayload::Chat { text, .. } => answers.push(text),
            _ => {}
        }
    }
    answers.sort();
    assert_eq!(answers, vec!["one", "two"]);
}

#[tokio::test]
async fn summarizer_joins_chat_lines() {
    let dir = tempfile::tempdir().unwrap();
    let claude = fake_cli(
        dir.path(),
        "claude",
        r#"echo '{"type":"assistant","message":"drafting"}'
echo '{"type":"result","result":"Ran tests."}'
echo 'not json'
echo '{"type":"result","result":"All passed."}'"#,
    );
    let commands = commands_with(claude, "codex".into());
    let summary = summarize_once(&commands, "claude", "sum", dir.path(), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(summary, "Ran tests.\nAll passed.");
}

#[tokio::test]
async fn summarizer_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let claude = fake_cli(dir.path(), "claude", "sleep 5");
    let commands = commands_with(claude, "codex".into());
    let err = summarize_once(
        &commands,
        "claude",
        "sum",
        dir.path(),
        Duration::from_millis(200),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, MoltError::Timeout(_)));
}

#[tokio::test]
async fn summarizer_error_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let timeout = Duration::from_secs(10);

    let stderr = fake_cli(dir.path(), "stderr", "echo '' >&2\necho 'quota exceeded' >&2");
    let err = summarize_with(stderr, dir.path(), timeout).await.unwrap_err();
    assert!(matches!(err, MoltError::ProviderStderr(ref m) if m == "quota exceeded"));

    let exit = fake_cli(dir.path(), "exit", "exit 4");
    let err = summarize_with(exit, dir.path(), timeout).await.unwrap_err();
    assert!(matches!(err, MoltError::ProviderExit { code: 4, .. }));

    let quiet = fake_cli(dir.path(), "quiet", r#"echo '{"type":"system"}'"#);
    let err = summarize_with(quiet, dir.path(), timeout).await.unwrap_err();
    assert!(matches!(err, MoltError::NoSummary));
}
