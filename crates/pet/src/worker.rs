//! Command and event plumbing for the `run` loop.
//!
//! Commands arrive as JSON lines on stdin and are forwarded over a crossbeam channel to the
//! animation thread. Events go the other way and are written as JSON lines on stdout.

use std::io::{BufRead, Write};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use pet_engine::gesture::ExpressionDispatch;
use pet_engine::status::EngineStatus;
use pet_engine::stream::SegmentId;

/// Segment id reported when a submission is rejected.
pub const REJECTED_SEGMENT_ID: i64 = -1;

/// Commands accepted by the animation thread.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    StartStream,
    /// Base64 WAV payload, optionally as a `data:audio/wav;base64,` URL.
    Speak { audio: String },
    /// WAV file on disk.
    SpeakFile { path: String },
    Expression { name: String },
    StopExpression,
    Motion { name: String },
    Pause,
    Resume,
    Stop,
    Status,
    Shutdown,
}

/// Events reported back to the transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    StreamStarted { already_running: bool },
    SegmentAccepted { id: i64, end_time: f64 },
    SegmentRejected { id: i64, error: String },
    SegmentFinished { id: i64 },
    SegmentCancelled { id: i64 },
    Expression { name: String, dispatch: String, order: Option<u32> },
    Motion { name: String, group: String, order: u32 },
    Paused { changed: bool },
    Resumed { changed: bool },
    Stopped,
    Status { status: EngineStatus },
    Error { message: String },
}

impl Event {
    pub fn accepted(id: SegmentId, end_time: f64) -> Self {
        Event::SegmentAccepted {
            id: wire_id(id),
            end_time,
        }
    }

    pub fn rejected(error: impl std::fmt::Display) -> Self {
        Event::SegmentRejected {
            id: REJECTED_SEGMENT_ID,
            error: error.to_string(),
        }
    }

    pub fn expression(name: &str, dispatch: &ExpressionDispatch) -> Self {
        let (kind, order) = match dispatch {
            ExpressionDispatch::Native(order) => ("native", Some(*order)),
            ExpressionDispatch::Recorded => ("recorded", None),
            ExpressionDispatch::Ignored => ("ignored", None),
        };
        Event::Expression {
            name: name.to_string(),
            dispatch: kind.to_string(),
            order,
        }
    }
}

/// Segment id as sent over the wire.
pub fn wire_id(id: SegmentId) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

pub fn parse_command(line: &str) -> Result<Command> {
    serde_json::from_str(line).with_context(|| format!("parse command {line:?}"))
}

/// Forward commands read from `input` until EOF. Blank lines are skipped; malformed lines
/// are forwarded as errors so the loop can report them.
pub fn spawn_command_reader<R>(input: R, cmd_tx: Sender<Result<Command>>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    std::thread::spawn(move || {
        for line in input.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("command read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if cmd_tx.send(parse_command(&line)).is_err() {
                break;
            }
        }
        tracing::debug!("command input closed");
    })
}

/// Write events as JSON lines until every sender is dropped.
pub fn spawn_event_writer<W>(mut out: W, event_rx: Receiver<Event>) -> JoinHandle<()>
where
    W: Write + Send + 'static,
{
    std::thread::spawn(move || {
        while let Ok(event) = event_rx.recv() {
            if let Err(e) = write_event(&mut out, &event) {
                tracing::warn!("event write error: {e:#}");
                break;
            }
        }
    })
}

fn write_event<W: Write>(out: &mut W, event: &Event) -> Result<()> {
    let line = serde_json::to_string(event)?;
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn parses_tagged_commands() {
        assert_eq!(
            parse_command(r#"{"cmd":"speak","audio":"UklGRg=="}"#).unwrap(),
            Command::Speak {
                audio: "UklGRg==".into()
            }
        );
        assert_eq!(
            parse_command(r#"{"cmd":"expression","name":"smile"}"#).unwrap(),
            Command::Expression {
                name: "smile".into()
            }
        );
        assert_eq!(parse_command(r#"{"cmd":"start_stream"}"#).unwrap(), Command::StartStream);
        assert!(parse_command(r#"{"cmd":"dance"}"#).is_err());
    }

    #[test]
    fn rejected_segments_carry_sentinel_id() {
        let json = serde_json::to_value(Event::rejected("stream not started")).unwrap();
        assert_eq!(json["event"], "segment_rejected");
        assert_eq!(json["id"], -1);
        assert_eq!(json["error"], "stream not started");
    }

    #[test]
    fn expression_event_names_dispatch() {
        let json = serde_json::to_value(Event::expression("happy", &ExpressionDispatch::Native(2))).unwrap();
        assert_eq!(json["dispatch"], "native");
        assert_eq!(json["order"], 2);
        let json = serde_json::to_value(Event::expression("x", &ExpressionDispatch::Ignored)).unwrap();
        assert_eq!(json["dispatch"], "ignored");
        assert!(json["order"].is_null());
    }

    #[test]
    fn reader_forwards_commands_and_bad_lines() {
        let input = Cursor::new(b"{\"cmd\":\"pause\"}\n\nnot json\n{\"cmd\":\"shutdown\"}\n".to_vec());
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        spawn_command_reader(input, cmd_tx).join().unwrap();
        let got: Vec<Result<Command>> = cmd_rx.try_iter().collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].as_ref().unwrap(), &Command::Pause);
        assert!(got[1].is_err());
        assert_eq!(got[2].as_ref().unwrap(), &Command::Shutdown);
    }

    #[test]
    fn writer_emits_json_lines() {
        let buf = SharedBuf::default();
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_event_writer(buf.clone(), rx);
        tx.send(Event::accepted(1, 0.5)).unwrap();
        tx.send(Event::SegmentFinished { id: 1 }).unwrap();
        drop(tx);
        handle.join().unwrap();
        let raw = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event\":\"segment_accepted\""));
        assert!(lines[1].contains("\"id\":1"));
    }
}
