//! End-to-end tests of the control plane against a fake searchd
//!
//! These drive the engine the way the binary does: calls arrive as JSON lines
//! on the UI channel, replies leave as JSON lines, and closing the UI channel
//! shuts everything down.

#![cfg(unix)]

use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use serial_test::serial;
use tokio::sync::mpsc;

use rats_app::config::{AppPaths, ControlDir, Environment, Settings};
use rats_app::transport::{read_calls, write_message};
use rats_app::{ControlContext, Engine, Outgoing, Worker};
use rats_core::ShutdownTrigger;
use rats_searchd::test_utils::{fake_searchd, FakeSearchd};
use rats_searchd::{Supervisor, SupervisorState};

const WAIT: Duration = Duration::from_secs(5);

/// Records the daemon state it saw when asked to stop
struct RecordingWorker {
    supervisor: Arc<Supervisor>,
    seen: Arc<Mutex<Vec<SupervisorState>>>,
    stops: Arc<AtomicUsize>,
}

impl Worker for RecordingWorker {
    fn stop(&self) -> BoxFuture<'_, ()> {
        async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.seen.lock().unwrap().push(self.supervisor.state());
        }
        .boxed()
    }
}

fn context(dir: &Path, behavior: FakeSearchd) -> ControlContext {
    let binary = fake_searchd(dir, behavior);
    let settings = Settings::default();
    let paths = AppPaths::new(
        Environment::Test,
        ControlDir {
            path: dir.to_path_buf(),
            portable: false,
        },
        None,
        &settings,
    );
    ControlContext::new(paths, settings, binary)
}

struct Harness {
    engine: Engine,
    seen: Arc<Mutex<Vec<SupervisorState>>>,
    stops: Arc<AtomicUsize>,
}

fn harness(dir: &Path, behavior: FakeSearchd) -> Harness {
    let ctx = context(dir, behavior);
    let supervisor = Arc::clone(&ctx.supervisor);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let stops = Arc::new(AtomicUsize::new(0));

    let worker = RecordingWorker {
        supervisor,
        seen: Arc::clone(&seen),
        stops: Arc::clone(&stops),
    };
    let engine = Engine::new(ctx).with_worker(move |bridge| {
        bridge.register_request("search", |args| async move {
            let query = args.first().cloned().unwrap_or(Value::Null);
            Ok(json!({ "query": query, "torrents": [] }))
        });
        Arc::new(worker) as Arc<dyn Worker>
    });

    Harness {
        engine,
        seen,
        stops,
    }
}

async fn next_line(rx: &mut mpsc::Receiver<Outgoing>) -> Value {
    let msg = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("message in time")
        .expect("ui channel open");
    let mut wire = Vec::new();
    write_message(&mut wire, &msg).unwrap();
    serde_json::from_slice(&wire).unwrap()
}

#[tokio::test]
#[serial]
async fn test_ui_session_then_close() {
    let temp = tempfile::tempdir().unwrap();
    let Harness {
        engine,
        seen,
        stops,
    } = harness(temp.path(), FakeSearchd::Healthy);

    let (out_tx, mut out_rx) = mpsc::channel(16);
    engine.bridge().attach_ui(out_tx);

    let (mut ui, daemon_side) = UnixStream::pair().unwrap();
    let calls = engine.call_sender();
    let triggers = engine.trigger_sender();
    let reader =
        std::thread::spawn(move || read_calls(BufReader::new(daemon_side), calls, triggers));

    let run = tokio::spawn(engine.run());

    // Sent before searchd is ready; answered once it is
    writeln!(ui, r#"["ping", [{{"callback": 1}}]]"#).unwrap();
    assert_eq!(next_line(&mut out_rx).await, json!(["callback", 1, "pong"]));

    writeln!(ui, r#"["search", ["debian", {{"callback": "q-7"}}]]"#).unwrap();
    assert_eq!(
        next_line(&mut out_rx).await,
        json!(["callback", "q-7", {"query": "debian", "torrents": []}])
    );

    // Configuration was generated next to the control files
    let conf = std::fs::read_to_string(temp.path().join("sphinx.conf")).unwrap();
    assert!(conf.contains("9312"));

    // UI goes away
    drop(ui);
    reader.join().unwrap();

    let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert!(result.is_ok(), "{:?}", result);

    assert_eq!(stops.load(Ordering::SeqCst), 1);
    // The worker finished before searchd was asked to stop
    assert_eq!(*seen.lock().unwrap(), vec![SupervisorState::Ready]);
}

#[tokio::test]
#[serial]
async fn test_concurrent_triggers_stop_once() {
    let temp = tempfile::tempdir().unwrap();
    let Harness { engine, stops, .. } = harness(temp.path(), FakeSearchd::Healthy);

    let (out_tx, mut out_rx) = mpsc::channel(16);
    engine.bridge().attach_ui(out_tx);
    let calls = engine.call_sender();
    let triggers = engine.trigger_sender();
    let run = tokio::spawn(engine.run());

    // Wait for the engine to be serving
    calls
        .send(rats_app::CallEnvelope::new("ping", vec![]).with_correlation(9u64))
        .await
        .unwrap();
    assert_eq!(next_line(&mut out_rx).await, json!(["callback", 9, "pong"]));

    let (a, b, c) = tokio::join!(
        triggers.send(ShutdownTrigger::UiClosed),
        triggers.send(ShutdownTrigger::QuitRequested),
        triggers.send(ShutdownTrigger::QuitRequested),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[serial]
async fn test_crash_tears_down_and_reports() {
    let temp = tempfile::tempdir().unwrap();
    let Harness { engine, stops, .. } = harness(temp.path(), FakeSearchd::CrashAfterReady);

    let bridge = Arc::clone(engine.bridge());
    let (out_tx, _out_rx) = mpsc::channel(16);
    bridge.attach_ui(out_tx);

    let err = tokio::time::timeout(WAIT, engine.run())
        .await
        .unwrap()
        .unwrap_err();

    assert!(err.is_fatal(), "{:?}", err);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(!bridge.is_ui_attached());
    assert_eq!(bridge.pending_count(), 0);
}
