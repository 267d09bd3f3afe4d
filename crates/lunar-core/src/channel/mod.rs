//! Output channel between a worker's redirected stdout and the controller.
//!
//! The write end is a plain blocking handle the interpreter writes to without
//! any buffering. The read end is registered with the tokio reactor and only
//! touched when the reactor reports it readable, so the controller never
//! polls.
//!
//! # Platforms
//!
//! - **Unix** - a connected `UnixStream` pair.
//! - **Windows** - a uniquely named pipe; the server end is read with
//!   overlapped I/O through tokio, the client end is a synchronous file handle.
//!
//! Both ends report end-of-stream once every write handle is closed, which
//! is how the controller learns that a run produced its last byte.

use std::io::{self, Write};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as platform;

/// Size of a single read from the channel.
const READ_CHUNK: usize = 4096;

/// Opens a fresh channel endpoint pair.
///
/// Must be called from within a tokio runtime: the read end is registered
/// with the current reactor.
pub fn open() -> io::Result<(OutputWriter, OutputReader)> {
    let (writer, reader) = platform::pair()?;
    Ok((
        OutputWriter { inner: writer },
        OutputReader {
            inner: reader,
            decoder: Utf8Decoder::default(),
            eof: false,
        },
    ))
}

/// Write end, owned by the worker thread.
pub struct OutputWriter {
    inner: platform::Writer,
}

impl OutputWriter {
    /// Write all bytes straight to the channel.
    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        (&self.inner).write_all(bytes)
    }
}

/// Read end, owned by the controller side.
pub struct OutputReader {
    inner: platform::Reader,
    decoder: Utf8Decoder,
    eof: bool,
}

impl OutputReader {
    /// Wait until data arrives and return everything currently available.
    ///
    /// Returns `Ok(None)` once the write end has been closed and all data
    /// has been consumed.
    pub async fn read(&mut self) -> io::Result<Option<String>> {
        loop {
            if self.eof {
                let rest = self.decoder.finish();
                return Ok((!rest.is_empty()).then_some(rest));
            }

            let mut bytes = Vec::new();
            self.eof = self.inner.read_available(&mut bytes).await?;

            let text = self.decoder.decode(&bytes);
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }
}

/// Incremental UTF-8 decoder.
///
/// Invalid sequences are replaced with U+FFFD. A multi-byte sequence cut at
/// the end of a chunk is held back until the next chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush whatever is still held back.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}
