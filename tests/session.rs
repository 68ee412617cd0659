//! Interactive session tests driven by scripted input lines

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use murmur::chat::ChatBackend;
use murmur::terminal::TerminalRenderer;
use murmur::{CredentialStore, SessionChannels, VoiceSession};

mod common;

use common::{Harness, MockBackend, Setup};

fn session(
    harness: Harness,
    backend: MockBackend,
    store: CredentialStore,
) -> VoiceSession<Vec<u8>> {
    let (_capture_tx, capture) = mpsc::unbounded_channel();
    let (_speech_tx, speech) = mpsc::unbounded_channel();
    let channels = SessionChannels {
        ui: harness.ui,
        capture,
        speech,
    };
    let backend: Arc<dyn ChatBackend> = Arc::new(backend);
    VoiceSession::new(
        harness.controller,
        backend,
        store,
        channels,
        TerminalRenderer::new(Vec::new()),
    )
}

/// Feed lines with a pause after each so spawned turns can finish
fn script(lines: &[&str]) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    let lines: Vec<String> = lines.iter().map(ToString::to_string).collect();
    tokio::spawn(async move {
        for line in lines {
            if tx.send(line).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });
    rx
}

fn output(session: &VoiceSession<Vec<u8>>) -> String {
    String::from_utf8_lossy(session.renderer().writer()).into_owned()
}

#[tokio::test]
async fn test_typed_turn_streams_reply() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Setup {
        speak_replies: false,
        ..Setup::default()
    }
    .build();
    let backend = MockBackend::replying(&["Hel", "lo ", "world"]);
    let requests = Arc::clone(&backend.requests);
    let mut session = session(harness, backend, CredentialStore::in_dir(dir.path()));

    session
        .run(script(&["t hi there", "ls", "q"]))
        .await
        .unwrap();

    let log = session.controller().log();
    assert_eq!(log.len(), 2);
    assert_eq!(log.nth(2).unwrap().content, "Hello world");
    assert!(!log.nth(2).unwrap().streaming);
    assert_eq!(requests.lock().unwrap().len(), 1);

    let out = output(&session);
    assert!(out.contains("you: hi there"));
    assert!(out.contains("assistant: Hello world\n"));
    assert!(out.contains("  2. ["));
}

#[tokio::test]
async fn test_bad_command_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(
        Setup::default().build(),
        MockBackend::replying(&[]),
        CredentialStore::in_dir(dir.path()),
    );

    session.run(script(&["dance", "d 4"])).await.unwrap();

    let out = output(&session);
    assert!(out.contains("[error] unknown command \"dance\""));
    assert!(out.contains("[error] no message 4"));
}

#[tokio::test]
async fn test_key_commands_persist() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::in_dir(dir.path());
    let harness = Setup {
        credential: false,
        ..Setup::default()
    }
    .build();
    let mut session = session(harness, MockBackend::replying(&["ok"]), store.clone());

    session.run(script(&["key   sk-or-saved  "])).await.unwrap();
    assert!(session.controller().has_credential());
    assert_eq!(store.load().unwrap().unwrap().expose(), "sk-or-saved");

    session.run(script(&["key clear"])).await.unwrap();
    assert!(!session.controller().has_credential());
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_end_of_input_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Setup::default().build();
    let mic = Arc::clone(&harness.mic);
    let mut session = session(
        harness,
        MockBackend::replying(&[]),
        CredentialStore::in_dir(dir.path()),
    );

    // Start recording, then input ends
    session.run(script(&[""])).await.unwrap();

    assert_eq!(
        session.controller().state(),
        murmur::RecordingState::Idle
    );
    assert_eq!(mic.lock().unwrap().held(), 0);
    assert!(output(&session).contains("● listening"));
}
