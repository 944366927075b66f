//! Incremental frame decoding from a byte stream
//!
//! Bytes arrive from the transport in arbitrary slices. The decoder keeps a
//! `BytesMut` buffer and a two state machine: waiting for the 12 byte header,
//! then waiting for the body the header announced. A malformed header or body
//! is fatal; the decoder refuses further input until reset.

use crate::constants::HEADER_LENGTH;
use crate::error::{Error, Result};
use crate::packets::{Dialect, Frame, Header, Tag, decode_body, decode_header};
use bytes::BytesMut;

#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForBody {
        tag: Tag,
        header: Header,
        body_length: usize,
    },
    Failed,
}

/// Splits a byte stream into frames
#[derive(Debug)]
pub struct FrameDecoder {
    dialect: Dialect,
    buffer: BytesMut,
    state: State,
}

impl FrameDecoder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForHeader,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Appends bytes and yields every frame they complete
    pub fn feed(&mut self, data: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(data);
        Frames {
            decoder: self,
            failed: false,
        }
    }

    /// Appends bytes and collects every frame they complete
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.feed(data).collect()
    }

    /// Extracts the next complete frame, if the buffer holds one
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::Failed => {
                    return Err(Error::MalformedFrame("decoder failed on earlier input".into()));
                }
                State::WaitingForHeader => {
                    if self.buffer.len() < HEADER_LENGTH {
                        return Ok(None);
                    }
                    let (tag, header, length) =
                        match decode_header(self.dialect, &self.buffer[..HEADER_LENGTH]) {
                            Ok(parsed) => parsed,
                            Err(e) => return Err(self.fail(e)),
                        };
                    let _ = self.buffer.split_to(HEADER_LENGTH);
                    self.state = State::WaitingForBody {
                        tag,
                        header,
                        body_length: length - HEADER_LENGTH,
                    };
                }
                State::WaitingForBody {
                    tag,
                    header,
                    body_length,
                } => {
                    if self.buffer.len() < *body_length {
                        return Ok(None);
                    }
                    let (tag, header) = (*tag, *header);
                    let body = self.buffer.split_to(*body_length);
                    self.state = State::WaitingForHeader;
                    return match decode_body(&body) {
                        Ok(payload) => Ok(Some(Frame {
                            tag,
                            header,
                            payload,
                        })),
                        Err(e) => Err(self.fail(e)),
                    };
                }
            }
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        self.state = State::Failed;
        self.buffer.clear();
        error
    }

    /// Number of buffered bytes not yet part of a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }
}

/// Lazily decoded frames from a [`FrameDecoder`]
///
/// Yields at most one error, then ends.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.decoder.next_frame().transpose();
        self.failed = matches!(next, Some(Err(_)));
        next
    }
}

/// Encodes a frame to wire bytes
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    frame.to_bytes()
}
