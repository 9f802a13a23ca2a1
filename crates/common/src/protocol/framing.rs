// Content-Length framing for the daemon socket.
//
// Each message is `<headers>\r\n\r\n<body>`, where the header block carries a
// case-insensitive `Content-Length: <n>` field and the body is exactly `n`
// bytes of UTF-8 JSON. A rejected frame consumes only its own bytes; whatever
// follows it in the buffer is kept for the next frame.

use thiserror::Error;

/// Default ceiling for a single frame body (5 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;
/// Header blocks longer than this without a terminator mean the stream is corrupt.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("frame header block is not valid UTF-8 text")]
    InvalidHeaders,
    #[error("frame header block has no Content-Length field")]
    MissingContentLength,
    #[error("invalid Content-Length value `{0}`")]
    InvalidContentLength(String),
    #[error("frame of {declared} bytes exceeds the {limit}-byte ceiling")]
    FrameTooLarge { declared: usize, limit: usize },
    #[error("header block exceeds {limit} bytes without a terminator")]
    HeaderOverflow { limit: usize },
}

impl FramingError {
    /// Fatal errors leave the stream unsynchronized; the connection should close.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HeaderOverflow { .. })
    }
}

/// Encode a body with its `Content-Length` header.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Incremental frame decoder. Feed it arbitrary chunks; it yields complete
/// bodies and retains any partial trailing frame.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    /// Bytes of an oversized body that have not arrived yet and must be skipped.
    discard_remaining: usize,
    deferred_error: Option<FramingError>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self { buffer: Vec::new(), max_frame_bytes, discard_remaining: 0, deferred_error: None }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Number of bytes buffered toward the next frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a chunk without extracting frames.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        let mut chunk = chunk;
        if self.discard_remaining > 0 {
            let skip = self.discard_remaining.min(chunk.len());
            self.discard_remaining -= skip;
            chunk = &chunk[skip..];
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Feed a chunk and return every frame it completes.
    ///
    /// If a frame is rejected after others were already extracted in the same
    /// call, the extracted frames are returned and the error is reported by the
    /// next call. Frames that follow a rejected one stay buffered; call again
    /// (an empty chunk is fine) to drain them.
    pub fn append_bytes(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        self.push_bytes(chunk);

        let mut frames = Vec::new();
        loop {
            match self.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return Ok(frames),
                Err(error) if frames.is_empty() => return Err(error),
                Err(error) => {
                    self.deferred_error = Some(error);
                    return Ok(frames);
                }
            }
        }
    }

    /// Extract the next complete frame from the buffer, if any.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        if let Some(error) = self.deferred_error.take() {
            return Err(error);
        }

        let Some(header_end) = find_terminator(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                self.buffer.clear();
                return Err(FramingError::HeaderOverflow { limit: MAX_HEADER_BYTES });
            }
            return Ok(None);
        };
        let body_start = header_end + HEADER_TERMINATOR.len();

        let declared = match parse_content_length(&self.buffer[..header_end]) {
            Ok(declared) => declared,
            Err(error) => {
                self.buffer.drain(..body_start);
                return Err(error);
            }
        };

        if declared > self.max_frame_bytes {
            let available = self.buffer.len() - body_start;
            if available >= declared {
                self.buffer.drain(..body_start + declared);
            } else {
                self.discard_remaining = declared - available;
                self.buffer.clear();
            }
            return Err(FramingError::FrameTooLarge { declared, limit: self.max_frame_bytes });
        }

        let frame_end = body_start + declared;
        if self.buffer.len() < frame_end {
            return Ok(None);
        }

        let body = self.buffer[body_start..frame_end].to_vec();
        self.buffer.drain(..frame_end);
        Ok(Some(body))
    }
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer.windows(HEADER_TERMINATOR.len()).position(|window| window == HEADER_TERMINATOR)
}

fn parse_content_length(header_block: &[u8]) -> Result<usize, FramingError> {
    let text = std::str::from_utf8(header_block).map_err(|_| FramingError::InvalidHeaders)?;

    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }
        let value = value.trim();
        return value
            .parse::<usize>()
            .map_err(|_| FramingError::InvalidContentLength(value.to_string()));
    }

    Err(FramingError::MissingContentLength)
}
