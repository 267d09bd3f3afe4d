//! Windows channel backend: an inbound named pipe read with overlapped I/O.

use std::fs::{File, OpenOptions};
use std::io;

use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};

use super::READ_CHUNK;

pub(super) type Writer = File;

pub(super) struct Reader {
    pipe: NamedPipeServer,
    connected: bool,
}

pub(super) fn pair() -> io::Result<(Writer, Reader)> {
    let name = format!(r"\\.\pipe\lunar-{}", uuid::Uuid::new_v4());

    let pipe = ServerOptions::new()
        .first_pipe_instance(true)
        .access_inbound(true)
        .access_outbound(false)
        .pipe_mode(PipeMode::Byte)
        .max_instances(1)
        .create(&name)?;

    // Synchronous client handle: the worker thread writes with plain blocking calls.
    let writer = OpenOptions::new().write(true).open(&name)?;

    Ok((
        writer,
        Reader {
            pipe,
            connected: false,
        },
    ))
}

impl Reader {
    /// Wait for the pending read to complete, then drain what is buffered.
    ///
    /// Returns `true` when the client end has been closed.
    pub(super) async fn read_available(&mut self, out: &mut Vec<u8>) -> io::Result<bool> {
        if !self.connected {
            // The client opened the pipe before this, so this completes at once.
            self.pipe.connect().await?;
            self.connected = true;
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            self.pipe.readable().await?;

            loop {
                match self.pipe.try_read(&mut chunk) {
                    Ok(0) => return Ok(true),
                    Ok(n) => out.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(true),
                    Err(e) => return Err(e),
                }
            }

            if !out.is_empty() {
                return Ok(false);
            }
        }
    }
}
