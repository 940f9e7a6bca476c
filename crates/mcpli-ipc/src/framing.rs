//! Newline-delimited framing.
//!
//! A frame is the compact JSON encoding of one message followed by a single
//! `\n`. The decoder accumulates bytes per connection and enforces two
//! limits: frames longer than `max_frame_bytes` produce a recoverable
//! [`FrameEvent::Oversize`] (the server answers with an error and closes),
//! while buffers past `kill_threshold_bytes` return a hard error (the
//! server closes without writing anything).

use serde::Serialize;

use crate::error::{IpcError, IpcResult};

/// Outcome of feeding bytes into the decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete frame (without its trailing `\n`).
    Frame(Vec<u8>),
    /// The current frame exceeded the soft limit before its terminator.
    Oversize {
        /// Bytes accumulated when the limit tripped.
        buffered: usize,
    },
}

/// Accumulates a byte stream and splits it into `\n`-terminated frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_bytes: usize,
    kill_threshold_bytes: usize,
    poisoned: bool,
}

impl FrameDecoder {
    /// Create a decoder with the given limits.
    ///
    /// `max_frame_bytes` must be strictly below `kill_threshold_bytes`;
    /// the constructor clamps it if a caller passes something looser.
    #[must_use]
    pub fn new(max_frame_bytes: usize, kill_threshold_bytes: usize) -> Self {
        let max_frame_bytes = max_frame_bytes.min(kill_threshold_bytes.saturating_sub(1));
        Self {
            buf: Vec::new(),
            max_frame_bytes,
            kill_threshold_bytes,
            poisoned: false,
        }
    }

    /// Feed received bytes; returns the events they complete.
    ///
    /// After an `Oversize` event or a hard-limit error the decoder is
    /// poisoned and must not be fed again (the connection is closing).
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::Frame`] when the buffered byte count crosses the
    /// kill threshold.
    pub fn push(&mut self, bytes: &[u8]) -> IpcResult<Vec<FrameEvent>> {
        debug_assert!(!self.poisoned, "decoder fed after poison");

        self.buf.extend_from_slice(bytes);

        if self.buf.len() >= self.kill_threshold_bytes {
            self.poisoned = true;
            return Err(IpcError::Frame(format!(
                "buffer reached kill threshold ({} bytes)",
                self.kill_threshold_bytes
            )));
        }

        let mut events = Vec::new();
        loop {
            match memchr_newline(&self.buf) {
                Some(pos) => {
                    let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
                    frame.pop(); // trailing '\n'
                    if frame.len() > self.max_frame_bytes {
                        self.poisoned = true;
                        events.push(FrameEvent::Oversize {
                            buffered: frame.len(),
                        });
                        return Ok(events);
                    }
                    events.push(FrameEvent::Frame(frame));
                },
                None => {
                    if self.buf.len() > self.max_frame_bytes {
                        self.poisoned = true;
                        events.push(FrameEvent::Oversize {
                            buffered: self.buf.len(),
                        });
                    }
                    return Ok(events);
                },
            }
        }
    }

    /// Bytes currently buffered without a terminator.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Encode a message as a single frame: compact JSON plus `\n`.
///
/// Compact `serde_json` output never contains a raw newline (newlines in
/// strings are escaped), which is what keeps the framing sound.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_frame<T: Serialize>(message: &T) -> IpcResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    debug_assert!(
        !bytes.contains(&b'\n'),
        "compact JSON must not contain raw newlines"
    );
    bytes.push(b'\n');
    Ok(bytes)
}

fn memchr_newline(haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|b| *b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{IpcMethod, IpcRequest, IpcResponse};

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(1024, 4096)
    }

    #[test]
    fn splits_exactly_on_newlines() {
        let mut d = decoder();
        let events = d.push(b"{\"a\":1}\n{\"b\":2}\n").unwrap();
        assert_eq!(
            events,
            vec![
                FrameEvent::Frame(b"{\"a\":1}".to_vec()),
                FrameEvent::Frame(b"{\"b\":2}".to_vec()),
            ]
        );
        assert_eq!(d.buffered(), 0);
    }

    #[test]
    fn reassembles_partial_frames() {
        let mut d = decoder();
        assert!(d.push(b"{\"id\":\"r").unwrap().is_empty());
        assert!(d.push(b"1\",\"method\"").unwrap().is_empty());
        let events = d.push(b":\"ping\"}\n").unwrap();
        assert_eq!(events.len(), 1);

        let FrameEvent::Frame(frame) = &events[0] else {
            panic!("expected frame");
        };
        let request: IpcRequest = serde_json::from_slice(frame).unwrap();
        assert_eq!(request.method, IpcMethod::Ping);
    }

    #[test]
    fn frame_at_limit_passes_one_past_fails() {
        let mut d = FrameDecoder::new(8, 4096);
        let events = d.push(b"12345678\n").unwrap();
        assert_eq!(events, vec![FrameEvent::Frame(b"12345678".to_vec())]);

        let mut d = FrameDecoder::new(8, 4096);
        let events = d.push(b"123456789\n").unwrap();
        assert_eq!(events, vec![FrameEvent::Oversize { buffered: 9 }]);
    }

    #[test]
    fn oversize_without_terminator_trips_soft_limit() {
        let mut d = FrameDecoder::new(8, 4096);
        let events = d.push(&[b'x'; 9]).unwrap();
        assert_eq!(events, vec![FrameEvent::Oversize { buffered: 9 }]);
    }

    #[test]
    fn kill_threshold_is_a_hard_error() {
        let mut d = FrameDecoder::new(8, 64);
        let err = d.push(&[b'x'; 64]).unwrap_err();
        assert!(matches!(err, IpcError::Frame(_)));
    }

    #[test]
    fn encode_frame_terminates_and_escapes_newlines() {
        let response = IpcResponse::ok("r1", serde_json::json!("line one\nline two"));
        let bytes = encode_frame(&response).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        // Exactly one raw newline: the terminator.
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn soft_limit_is_clamped_below_kill_threshold() {
        let d = FrameDecoder::new(4096, 1024);
        assert!(d.max_frame_bytes < d.kill_threshold_bytes);
    }
}
