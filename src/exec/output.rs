// src/exec/output.rs

//! Line readers for child pipes.

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::exec::backend::OutputEvent;
use crate::types::StreamKind;

/// Longest line forwarded as one event; longer lines are split.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Spawn a task forwarding every line of `pipe` to `tx`.
///
/// Lines longer than [`MAX_LINE_BYTES`] arrive as several consecutive
/// events. The task ends at EOF, on a read error (after sending
/// [`OutputEvent::Truncated`]), or when the receiver is gone.
pub fn spawn_line_reader<R>(
    pipe: R,
    stream: StreamKind,
    tx: mpsc::Sender<OutputEvent>,
    pid: Option<u32>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::with_capacity(256);
        // Set while the previous chunk ended mid-line.
        let mut continuing = false;

        loop {
            buf.clear();
            let read = (&mut reader)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut buf)
                .await;
            match read {
                Ok(0) => {
                    debug!(?pid, %stream, "pipe reached EOF");
                    break;
                }
                Ok(n) => {
                    let split = n == MAX_LINE_BYTES && buf.last() != Some(&b'\n');
                    if split && !continuing {
                        warn!(
                            ?pid,
                            %stream,
                            max_bytes = MAX_LINE_BYTES,
                            "output line exceeds the length cap; splitting it"
                        );
                    }
                    // The terminator of a line that ended exactly on the cap.
                    let bare_terminator = continuing && decode_line(&buf).is_empty();
                    continuing = split;
                    if bare_terminator {
                        continue;
                    }

                    let event = OutputEvent::Line {
                        stream,
                        payload: decode_line(&buf),
                        timestamp: Utc::now(),
                    };
                    if tx.send(event).await.is_err() {
                        debug!(?pid, %stream, "output receiver dropped; stopping reader");
                        break;
                    }
                }
                Err(e) => {
                    warn!(?pid, %stream, error = %e, "failed to read from child pipe");
                    let _ = tx
                        .send(OutputEvent::Truncated {
                            stream,
                            reason: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    })
}

/// Strip the line terminator and decode lossily.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
