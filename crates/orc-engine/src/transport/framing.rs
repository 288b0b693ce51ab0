//! Stream framer: cuts the inbound byte stream into whole OP messages.
//!
//! A frame is one top-level `{ ... }` unit. Brace depth and backslash escapes
//! are tracked across reads, so a message split over several TCP segments (or
//! several messages in one segment) frames correctly. Padding between frames
//! is skipped; any other stray byte outside a frame is discarded and counted.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

const INITIAL_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

#[derive(Debug)]
pub struct OpFramer {
    buf: BytesMut,
    max_frame_bytes: usize,
    // bytes of the current frame already examined (frame starts at buf[0])
    scanned: usize,
    depth: usize,
    escaped: bool,
    discarded: u64,
}

impl OpFramer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY.min(max_frame_bytes.max(64))),
            max_frame_bytes,
            scanned: 0,
            depth: 0,
            escaped: false,
            discarded: 0,
        }
    }

    /// Read target for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Stray bytes dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Next complete frame, `Ok(None)` when more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.depth == 0 {
            self.skip_to_frame_start();
            if self.buf.is_empty() {
                return Ok(None);
            }
            self.scanned = 0;
        }

        while self.scanned < self.buf.len() {
            let b = self.buf[self.scanned];
            self.scanned += 1;

            if self.escaped {
                self.escaped = false;
            } else {
                match b {
                    b'\\' => self.escaped = true,
                    b'{' => self.depth += 1,
                    b'}' => {
                        self.depth = self.depth.saturating_sub(1);
                        if self.depth == 0 {
                            let frame = self.buf.split_to(self.scanned).freeze();
                            self.scanned = 0;
                            return Ok(Some(frame));
                        }
                    }
                    _ => {}
                }
            }

            if self.scanned > self.max_frame_bytes {
                return Err(FrameError::TooLarge {
                    limit: self.max_frame_bytes,
                });
            }
        }

        Ok(None)
    }

    fn skip_to_frame_start(&mut self) {
        let skip = self
            .buf
            .iter()
            .position(|&b| b == b'{')
            .unwrap_or(self.buf.len());
        if skip == 0 {
            return;
        }

        let stray = self.buf[..skip]
            .iter()
            .filter(|&&b| !matches!(b, b' ' | b'\r' | b'\n' | b'\t' | 0))
            .count();
        if stray > 0 {
            self.discarded += stray as u64;
            tracing::warn!(stray, total = self.discarded, "discarding bytes outside a frame");
        }
        self.buf.advance(skip);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn frames(framer: &mut OpFramer) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(f) = framer.next_frame().unwrap() {
            out.push(String::from_utf8(f.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn frame_split_across_reads() {
        let mut f = OpFramer::new(1024);
        f.extend(b"{a=1|b={c=");
        assert!(frames(&mut f).is_empty());
        f.extend(b"2}}");
        assert_eq!(frames(&mut f), ["{a=1|b={c=2}}"]);
    }

    #[test]
    fn several_frames_in_one_read() {
        let mut f = OpFramer::new(1024);
        f.extend(b"{a=1}\r\n{b=2}\0{c=3");
        assert_eq!(frames(&mut f), ["{a=1}", "{b=2}"]);
        f.extend(b"}");
        assert_eq!(frames(&mut f), ["{c=3}"]);
        assert_eq!(f.discarded(), 0);
    }

    #[test]
    fn escaped_braces_do_not_close_frames() {
        let mut f = OpFramer::new(1024);
        f.extend(br"{a=x\}y|b=\\}{c=\{}");
        assert_eq!(frames(&mut f), [r"{a=x\}y|b=\\}", r"{c=\{}"]);
    }

    #[test]
    fn escape_state_survives_read_boundary() {
        let mut f = OpFramer::new(1024);
        f.extend(br"{a=x\");
        assert!(frames(&mut f).is_empty());
        f.extend(br"}}");
        assert_eq!(frames(&mut f), [r"{a=x\}}"]);
    }

    #[test]
    fn stray_bytes_are_discarded() {
        let mut f = OpFramer::new(1024);
        f.extend(b"junk}{a=1}");
        assert_eq!(frames(&mut f), ["{a=1}"]);
        assert_eq!(f.discarded(), 5);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut f = OpFramer::new(64);
        f.extend(format!("{{a={}", "x".repeat(100)).as_bytes());
        assert!(matches!(f.next_frame(), Err(FrameError::TooLarge { limit: 64 })));
    }
}
