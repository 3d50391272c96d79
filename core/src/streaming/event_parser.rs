use std::collections::VecDeque;
use std::str::from_utf8;

use tracing::trace;

use super::error::{Result, StreamError};
use super::response::{find_header_end, parse_response_head, ResponseHead};

const MAX_HEAD_LEN: usize = 64 * 1024;
const MAX_CHUNK_SIZE_LINE: usize = 1024;

/// One unit decoded off the stream socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Head(ResponseHead),
    /// A non-empty body line without its terminator.
    Line(Vec<u8>),
    /// The response body ended (last chunk, or content length reached).
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Head,
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Length { remaining: usize },
    UntilClose,
    Done,
}

const LOGIFY_MAX_CHARS: usize = 100;
fn logify(bytes: &[u8]) -> String {
    let stringified = from_utf8(bytes).unwrap_or("<bad utf8>");
    stringified.chars().take(LOGIFY_MAX_CHARS).collect()
}

/// Splits body bytes on `\n`, `\r\n` or a lone `\r`, across reads.
#[derive(Debug)]
struct LineSplitter {
    /// the most-recently received line, pending completion by a terminator
    incomplete_line: Vec<u8>,
    /// set when the last byte processed was a carriage return, so a following
    /// line feed is treated as part of the same terminator
    last_char_was_cr: bool,
    max_line_len: usize,
}

impl LineSplitter {
    fn new(max_line_len: usize) -> Self {
        Self {
            incomplete_line: Vec::new(),
            last_char_was_cr: false,
            max_line_len,
        }
    }

    fn push(&mut self, mut bytes: &[u8], frames: &mut VecDeque<Frame>) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.last_char_was_cr {
            self.last_char_was_cr = false;
            if let Some(rest) = bytes.strip_prefix(b"\n") {
                bytes = rest;
            }
        }

        while let Some(pos) = bytes.iter().position(|&b| b == b'\n' || b == b'\r') {
            self.extend(&bytes[..pos])?;
            let terminator = bytes[pos];
            bytes = &bytes[pos + 1..];
            if terminator == b'\r' {
                match bytes.strip_prefix(b"\n") {
                    Some(rest) => bytes = rest,
                    None if bytes.is_empty() => self.last_char_was_cr = true,
                    None => {}
                }
            }
            self.complete(frames);
        }

        self.extend(bytes)?;
        if !self.incomplete_line.is_empty() {
            trace!("buffering incomplete line: {:?}", logify(&self.incomplete_line));
        }
        Ok(())
    }

    fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        if self.incomplete_line.len() + bytes.len() > self.max_line_len {
            return Err(StreamError::Protocol(format!(
                "line exceeds {} bytes",
                self.max_line_len
            )));
        }
        self.incomplete_line.extend_from_slice(bytes);
        Ok(())
    }

    fn complete(&mut self, frames: &mut VecDeque<Frame>) {
        if self.incomplete_line.is_empty() {
            trace!("keep-alive line");
            return;
        }
        let line = std::mem::take(&mut self.incomplete_line);
        trace!("complete line: {:?}", logify(&line));
        frames.push_back(Frame::Line(line));
    }
}

/// Incremental decoder for an HTTP/1.1 response carrying newline-delimited
/// messages.
///
/// Bytes may arrive split at any boundary: inside the head, inside a chunk
/// size line, between `\r` and `\n`. Decoded frames are queued and taken with
/// [`FrameDecoder::next_frame`].
#[derive(Debug)]
#[must_use = "frames do nothing unless taken"]
pub struct FrameDecoder {
    state: BodyState,
    /// transport bytes not yet consumed by the head or chunk framing
    pending: Vec<u8>,
    lines: LineSplitter,
    frames: VecDeque<Frame>,
}

impl FrameDecoder {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            state: BodyState::Head,
            pending: Vec::new(),
            lines: LineSplitter::new(max_line_len),
            frames: VecDeque::with_capacity(4),
        }
    }

    pub fn head_received(&self) -> bool {
        self.state != BodyState::Head
    }

    pub fn is_done(&self) -> bool {
        self.state == BodyState::Done
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn process_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state == BodyState::Done {
            trace!("ignoring {} bytes after end of body", bytes.len());
            return Ok(());
        }
        self.pending.extend_from_slice(bytes);

        let mut pos = 0;
        let result = self.drain_pending(&mut pos);
        self.pending.drain(..pos);
        result
    }

    /// The peer closed the connection. Flushes a trailing unterminated line.
    pub fn finish(&mut self) {
        match self.state {
            BodyState::Head | BodyState::Done => {}
            _ => self.end_body(),
        }
    }

    fn end_body(&mut self) {
        self.lines.complete(&mut self.frames);
        self.frames.push_back(Frame::End);
        self.state = BodyState::Done;
    }

    fn drain_pending(&mut self, pos: &mut usize) -> Result<()> {
        loop {
            let available = &self.pending[*pos..];
            match self.state {
                BodyState::Head => {
                    let Some(end) = find_header_end(available) else {
                        if available.len() > MAX_HEAD_LEN {
                            return Err(StreamError::Protocol(format!(
                                "response head exceeds {MAX_HEAD_LEN} bytes"
                            )));
                        }
                        return Ok(());
                    };
                    let head = parse_response_head(&available[..end])?;
                    *pos += end + 4;
                    trace!("response head: {} {}", head.status(), head.reason());

                    self.state = if head.is_chunked() {
                        BodyState::ChunkSize
                    } else if let Some(length) = head.content_length() {
                        BodyState::Length { remaining: length }
                    } else {
                        BodyState::UntilClose
                    };
                    self.frames.push_back(Frame::Head(head));
                    if self.state == (BodyState::Length { remaining: 0 }) {
                        self.end_body();
                    }
                }
                BodyState::ChunkSize => {
                    let Some(crlf) = available.windows(2).position(|w| w == b"\r\n") else {
                        if available.len() > MAX_CHUNK_SIZE_LINE {
                            return Err(StreamError::Protocol("chunk size line too long".into()));
                        }
                        return Ok(());
                    };
                    let size = parse_chunk_size(&available[..crlf])?;
                    *pos += crlf + 2;
                    if size == 0 {
                        trace!("last chunk");
                        self.end_body();
                    } else {
                        self.state = BodyState::ChunkData { remaining: size };
                    }
                }
                BodyState::ChunkData { remaining } => {
                    if available.is_empty() {
                        return Ok(());
                    }
                    let n = remaining.min(available.len());
                    self.lines.push(&available[..n], &mut self.frames)?;
                    *pos += n;
                    self.state = if n == remaining {
                        BodyState::ChunkDataEnd
                    } else {
                        BodyState::ChunkData {
                            remaining: remaining - n,
                        }
                    };
                }
                BodyState::ChunkDataEnd => {
                    if available.len() < 2 {
                        return Ok(());
                    }
                    if &available[..2] != b"\r\n" {
                        return Err(StreamError::Protocol(
                            "missing CRLF after chunk data".into(),
                        ));
                    }
                    *pos += 2;
                    self.state = BodyState::ChunkSize;
                }
                BodyState::Length { remaining } => {
                    if available.is_empty() {
                        return Ok(());
                    }
                    let n = remaining.min(available.len());
                    self.lines.push(&available[..n], &mut self.frames)?;
                    *pos += n;
                    if n == remaining {
                        self.end_body();
                    } else {
                        self.state = BodyState::Length {
                            remaining: remaining - n,
                        };
                    }
                }
                BodyState::UntilClose => {
                    self.lines.push(available, &mut self.frames)?;
                    *pos += available.len();
                    return Ok(());
                }
                BodyState::Done => {
                    *pos = self.pending.len();
                    return Ok(());
                }
            }
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let text = from_utf8(line)
        .map_err(|_| StreamError::Protocol("chunk size is not utf-8".into()))?;
    // Strip chunk extensions (;key=value).
    let hex = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(hex, 16)
        .map_err(|_| StreamError::Protocol(format!("invalid chunk size: {:?}", logify(line))))
}
