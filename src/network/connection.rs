use crate::error::Result;
use crate::protocol::frame::parse_request;
use crate::protocol::{write_reply, CommandExecutor};
use bytes::BytesMut;
use mio::Interest;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Per-client protocol state
///
/// Buffers inbound bytes until whole requests are available, runs them in
/// arrival order and queues the framed responses. The intent flags tell the
/// event loop which readiness to wait for next.
pub struct Connection {
    pub connection_id: usize,
    pub peer_addr: Option<SocketAddr>,

    // Inbound bytes not yet forming a complete request
    incoming: BytesMut,

    // Framed responses; everything before write_position has been sent
    write_buffer: Vec<u8>,
    write_position: usize,

    want_read: bool,
    want_write: bool,
    want_close: bool,

    pub requests_served: u64,
}

impl Connection {
    pub fn new(connection_id: usize, buffer_size: usize, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            connection_id,
            peer_addr,
            incoming: BytesMut::with_capacity(buffer_size),
            write_buffer: Vec::with_capacity(buffer_size),
            write_position: 0,
            want_read: true,
            want_write: false,
            want_close: false,
            requests_served: 0,
        }
    }

    pub fn want_read(&self) -> bool {
        self.want_read
    }

    pub fn want_write(&self) -> bool {
        self.want_write
    }

    pub fn want_close(&self) -> bool {
        self.want_close
    }

    pub fn close(&mut self) {
        self.want_close = true;
    }

    /// Readiness the event loop should wait for, `None` once closing.
    pub fn interest(&self) -> Option<Interest> {
        if self.want_close {
            None
        } else if self.want_write {
            Some(Interest::WRITABLE)
        } else {
            Some(Interest::READABLE)
        }
    }

    /// Append `data` and run every complete request it finishes.
    ///
    /// A protocol violation marks the connection for closing; responses
    /// to requests that preceded it stay queued.
    pub fn process_read(&mut self, data: &[u8], executor: &mut CommandExecutor) -> Result<()> {
        self.incoming.extend_from_slice(data);

        // Only reset the buffer once every previous byte has been sent
        if self.write_position >= self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_position = 0;
        }

        let result: Result<()> = loop {
            match parse_request(&mut self.incoming) {
                Ok(Some(args)) => {
                    let reply = executor.dispatch(args);
                    write_reply(&mut self.write_buffer, &reply);
                    self.requests_served += 1;
                }
                Ok(None) => break Ok(()),
                Err(e) => {
                    warn!(
                        "Protocol error on connection {} ({:?}): {}",
                        self.connection_id, self.peer_addr, e
                    );
                    self.want_close = true;
                    break Err(e.into());
                }
            }
        };

        if self.pending_writes().is_some() {
            self.want_read = false;
            self.want_write = true;
        }
        result
    }

    /// Pending response bytes, if any
    pub fn pending_writes(&self) -> Option<&[u8]> {
        if self.write_position < self.write_buffer.len() {
            Some(&self.write_buffer[self.write_position..])
        } else {
            None
        }
    }

    /// Mark bytes as written
    pub fn consume_writes(&mut self, n: usize) {
        self.write_position += n;
        if self.write_position >= self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_position = 0;
            self.want_write = false;
            self.want_read = true;
        }
    }

    /// Write queued responses until they run out or the socket would block.
    pub fn handle_write<S: Write>(&mut self, stream: &mut S) -> Result<()> {
        while let Some(data) = self.pending_writes() {
            match stream.write(data) {
                Ok(0) => {
                    self.want_close = true;
                    return Err(std::io::Error::from(ErrorKind::WriteZero).into());
                }
                Ok(n) => self.consume_writes(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.want_close = true;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Drive the socket after a readiness event.
    ///
    /// Readiness is edge-triggered, so this keeps reading and writing until
    /// the socket would block, the connection stalls on output, or it has to
    /// close. `scratch` is the per-loop read buffer.
    pub fn handle_io<S: Read + Write>(
        &mut self,
        stream: &mut S,
        executor: &mut CommandExecutor,
        scratch: &mut [u8],
    ) -> Result<()> {
        while !self.want_close {
            if self.want_write {
                self.handle_write(stream)?;
                if self.want_write {
                    // Wait for writability before reading more
                    break;
                }
            }

            let n = match stream.read(scratch) {
                Ok(0) => {
                    if self.incoming.is_empty() {
                        debug!("Connection {} closed by peer", self.connection_id);
                    } else {
                        warn!(
                            "Unexpected EOF on connection {} with {} buffered bytes",
                            self.connection_id,
                            self.incoming.len()
                        );
                    }
                    self.want_close = true;
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.want_close = true;
                    return Err(e.into());
                }
            };

            if self.process_read(&scratch[..n], executor).is_err() {
                // One attempt at flushing what earlier requests produced
                let _ = self.handle_write(stream);
                self.want_close = true;
            }
        }
        Ok(())
    }
}
