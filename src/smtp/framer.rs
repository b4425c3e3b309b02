// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Splitting of the inbound byte stream into lines

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One unit produced by the framer
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// Line contents, without its terminator
    Complete(Vec<u8>),
    /// Line exceeded the limit; its contents were discarded
    TooLong,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("connection closed in the middle of a line")]
    UnexpectedEof,
}

/// Reads lines terminated by CRLF (bare LF is tolerated) from a stream
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
    /// Bytes of `buffer` known not to contain a line feed
    scanned: usize,
    /// Currently skipping the remainder of an overlong line
    overflow: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        LineReader {
            reader,
            buffer: Vec::with_capacity(1024),
            scanned: 0,
            overflow: false,
        }
    }

    /// Read next line of at most `limit` bytes, terminator included
    ///
    /// Returns `Ok(None)` when the peer closes the connection between lines.
    pub async fn read_line(&mut self, limit: usize) -> Result<Option<Line>, FrameError> {
        loop {
            if let Some(line) = self.take_line(limit) {
                return Ok(Some(line));
            }

            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return if self.buffer.is_empty() && !self.overflow {
                    Ok(None)
                } else {
                    Err(FrameError::UnexpectedEof)
                };
            }
        }
    }

    fn take_line(&mut self, limit: usize) -> Option<Line> {
        match memchr::memchr(b'\n', &self.buffer[self.scanned..]) {
            Some(offset) => {
                let end = self.scanned + offset + 1;
                let mut line: Vec<u8> = self.buffer.drain(..end).collect();
                self.scanned = 0;

                if std::mem::take(&mut self.overflow) || line.len() > limit {
                    return Some(Line::TooLong);
                }

                line.pop();
                if line.ends_with(b"\r") {
                    line.pop();
                }

                Some(Line::Complete(line))
            }
            None => {
                if self.buffer.len() > limit {
                    // Nothing of this line will be used, there is no need to
                    // keep it in memory
                    self.overflow = true;
                    self.buffer.clear();
                }
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}
