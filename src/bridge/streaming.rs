//! NDJSON frame decoder for streaming chat responses.
//!
//! Reads a byte stream, splits on `\n`, and parses each line as a
//! [`BackendFrame`]. A line split across reads waits in the buffer for the
//! rest of it. Malformed lines are logged and skipped; they never end the
//! stream.
//!
//! The stream ends after the first `done` frame or at end of input. A read
//! error, or no bytes within the idle timeout, is yielded once as
//! [`BridgeError::Connectivity`] and ends it. A fired cancellation token is
//! yielded once as [`BridgeError::Cancelled`]. Dropping the stream drops the
//! body reader.

use std::pin::Pin;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::errors::BridgeError;
use super::types::BackendFrame;

/// Boxed frame stream handed from transport to orchestrator.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<BackendFrame, BridgeError>> + Send>>;

/// Where a stream came from, for error messages.
#[derive(Debug, Clone)]
pub(crate) struct StreamOrigin {
    pub url: String,
    pub model: String,
}

struct FrameReader<S> {
    bytes: S,
    buffer: Vec<u8>,
    finished: bool,
    cancel: CancellationToken,
    idle_timeout: Duration,
    origin: StreamOrigin,
}

/// Decode an NDJSON byte stream into backend frames.
///
/// `idle_timeout` bounds each wait for the next chunk, not the whole body.
pub(crate) fn ndjson_frames<S, B, E>(
    bytes: S,
    cancel: CancellationToken,
    idle_timeout: Duration,
    origin: StreamOrigin,
) -> impl Stream<Item = Result<BackendFrame, BridgeError>> + Send
where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let reader = FrameReader {
        bytes,
        buffer: Vec::new(),
        finished: false,
        cancel,
        idle_timeout,
        origin,
    };

    stream::unfold(reader, |mut r| async move {
        if r.finished {
            return None;
        }
        loop {
            // Drain complete lines before reading more
            if let Some(pos) = r.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = r.buffer.drain(..=pos).collect();
                match decode_line(&line) {
                    Some(Ok(frame)) => {
                        r.finished = frame.done;
                        return Some((Ok(frame), r));
                    }
                    Some(Err(reason)) => {
                        tracing::warn!(model = %r.origin.model, error = %reason, "skipping malformed stream frame");
                        continue;
                    }
                    None => continue,
                }
            }

            let read = tokio::select! {
                biased;
                _ = r.cancel.cancelled() => None,
                next = tokio::time::timeout(r.idle_timeout, r.bytes.next()) => Some(next),
            };
            let Some(read) = read else {
                r.finished = true;
                tracing::info!(model = %r.origin.model, "stream cancelled");
                return Some((Err(BridgeError::Cancelled { operation: "stream".into() }), r));
            };
            let Ok(next) = read else {
                r.finished = true;
                let idle_ms = r.idle_timeout.as_millis() as u64;
                tracing::warn!(model = %r.origin.model, idle_ms, "stream stalled");
                let err = BridgeError::Connectivity {
                    url: r.origin.url.clone(),
                    model: r.origin.model.clone(),
                    operation: "stream".into(),
                    attempts: 1,
                    last_error: format!("no data received for {idle_ms}ms"),
                };
                return Some((Err(err), r));
            };

            match next {
                Some(Ok(chunk)) => r.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    r.finished = true;
                    let err = BridgeError::Connectivity {
                        url: r.origin.url.clone(),
                        model: r.origin.model.clone(),
                        operation: "stream".into(),
                        attempts: 1,
                        last_error: format!("stream read error: {e}"),
                    };
                    return Some((Err(err), r));
                }
                None => {
                    // End of input: the last line may lack its newline
                    r.finished = true;
                    let rest = std::mem::take(&mut r.buffer);
                    return match decode_line(&rest) {
                        Some(Ok(frame)) => Some((Ok(frame), r)),
                        Some(Err(reason)) => {
                            tracing::warn!(model = %r.origin.model, error = %reason, "skipping malformed trailing frame");
                            None
                        }
                        None => None,
                    };
                }
            }
        }
    })
}

/// Parse one line. `None` for a blank line.
fn decode_line(line: &[u8]) -> Option<Result<BackendFrame, String>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str::<BackendFrame>(text).map_err(|e| format!("{e} (line: {text})")))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
