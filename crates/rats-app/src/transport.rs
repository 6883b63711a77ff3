//! JSON-lines transport between the UI process and the bridge
//!
//! Calls arrive on stdin, one JSON array per line. Replies and events leave on
//! stdout the same way. Logs never go to stdout.
//!
//! ```text
//! > ["search", ["ubuntu", {"callback": 1}]]
//! < ["callback", 1, [...]]
//! < ["newTorrent", {...}]
//! ```
//!
//! Stdin EOF means the UI is gone.

use std::io::{BufRead, Write};

use tokio::sync::mpsc;

use crate::bridge::{Bridge, CallEnvelope, Outgoing};
use rats_core::prelude::*;
use rats_core::ShutdownTrigger;

/// Read calls until EOF, then report [`ShutdownTrigger::UiClosed`].
///
/// Blocking; run it on a dedicated thread. Malformed lines are logged and
/// skipped.
pub fn read_calls<R: BufRead>(
    reader: R,
    call_tx: mpsc::Sender<CallEnvelope>,
    trigger_tx: mpsc::Sender<ShutdownTrigger>,
) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match CallEnvelope::parse_line(trimmed) {
                    Ok(call) => {
                        if call_tx.blocking_send(call).is_err() {
                            debug!("Bridge inbound closed, stopping UI reader");
                            return;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed UI line: {}", e),
                }
            }
            Err(e) => {
                error!("Failed to read UI channel: {}", e);
                break;
            }
        }
    }

    info!("UI channel closed");
    let _ = trigger_tx.blocking_send(ShutdownTrigger::UiClosed);
}

/// Write one message as a JSON line and flush
pub fn write_message<W: Write>(out: &mut W, msg: &Outgoing) -> Result<()> {
    let json = serde_json::to_string(&msg.to_wire())?;
    writeln!(out, "{}", json)?;
    out.flush()?;
    Ok(())
}

/// Forward bridge output to stdout until the bridge detaches
pub async fn forward_to_stdout(mut rx: mpsc::Receiver<Outgoing>) {
    while let Some(msg) = rx.recv().await {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = write_message(&mut stdout, &msg) {
            error!("Failed to write to UI channel: {}", e);
            return;
        }
    }
    debug!("UI writer finished");
}

/// Wire the bridge to this process's stdin/stdout
pub fn spawn_stdio(
    bridge: &Bridge,
    call_tx: mpsc::Sender<CallEnvelope>,
    trigger_tx: mpsc::Sender<ShutdownTrigger>,
) {
    let (out_tx, out_rx) = mpsc::channel::<Outgoing>(256);
    bridge.attach_ui(out_tx);
    tokio::spawn(forward_to_stdout(out_rx));

    // std thread: a blocking stdin read cannot be cancelled and would keep
    // the runtime from shutting down
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        read_calls(stdin.lock(), call_tx, trigger_tx);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn run_reader(input: &str) -> (Vec<CallEnvelope>, Vec<ShutdownTrigger>) {
        let (call_tx, mut call_rx) = mpsc::channel(16);
        let (trigger_tx, mut trigger_rx) = mpsc::channel(4);

        read_calls(Cursor::new(input.to_string()), call_tx, trigger_tx);

        let mut calls = Vec::new();
        while let Ok(call) = call_rx.try_recv() {
            calls.push(call);
        }
        let mut triggers = Vec::new();
        while let Ok(trigger) = trigger_rx.try_recv() {
            triggers.push(trigger);
        }
        (calls, triggers)
    }

    #[test]
    fn test_reads_calls_then_reports_ui_closed() {
        let input = concat!(
            "[\"ping\", [{\"callback\": \"a\"}]]\n",
            "\n",
            "[\"search\", [\"linux\", 20, {\"callback\": 2}]]\n",
        );
        let (calls, triggers) = run_reader(input);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, "ping");
        assert_eq!(calls[1].args, vec![json!("linux"), json!(20)]);
        assert_eq!(triggers, vec![ShutdownTrigger::UiClosed]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let input = "garbage\n{\"not\": \"an array\"}\n[\"ping\"]\n";
        let (calls, triggers) = run_reader(input);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, "ping");
        assert_eq!(triggers, vec![ShutdownTrigger::UiClosed]);
    }

    #[test]
    fn test_empty_input_is_ui_closed() {
        let (calls, triggers) = run_reader("");
        assert!(calls.is_empty());
        assert_eq!(triggers, vec![ShutdownTrigger::UiClosed]);
    }

    #[test]
    fn test_write_message_is_one_line() {
        let mut out = Vec::new();
        write_message(
            &mut out,
            &Outgoing::Reply {
                token: "t1".into(),
                result: json!({"a": [1, 2]}),
            },
        )
        .unwrap();
        write_message(
            &mut out,
            &Outgoing::Event {
                name: "remoteSearchResults".to_string(),
                payload: vec![json!("x")],
            },
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(lines[0]).unwrap(),
            json!(["callback", "t1", {"a": [1, 2]}])
        );
        assert_eq!(lines[1], r#"["remoteSearchResults","x"]"#);
    }
}
