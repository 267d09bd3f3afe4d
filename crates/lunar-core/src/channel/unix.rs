//! Unix channel backend: a connected local socket pair.

use std::io;
use std::net::Shutdown;

use super::READ_CHUNK;

pub(super) type Writer = std::os::unix::net::UnixStream;

pub(super) struct Reader {
    stream: tokio::net::UnixStream,
}

pub(super) fn pair() -> io::Result<(Writer, Reader)> {
    let (tx, rx) = std::os::unix::net::UnixStream::pair()?;

    // One-directional: the worker never reads, the controller never writes.
    tx.shutdown(Shutdown::Read)?;
    rx.shutdown(Shutdown::Write)?;

    rx.set_nonblocking(true)?;
    let stream = tokio::net::UnixStream::from_std(rx)?;

    Ok((tx, Reader { stream }))
}

impl Reader {
    /// Wait for readiness, then drain everything the socket holds.
    ///
    /// Returns `true` when the peer has closed its end.
    pub(super) async fn read_available(&mut self, out: &mut Vec<u8>) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            self.stream.readable().await?;

            loop {
                match self.stream.try_read(&mut chunk) {
                    Ok(0) => return Ok(true),
                    Ok(n) => out.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            if !out.is_empty() {
                return Ok(false);
            }
        }
    }
}
