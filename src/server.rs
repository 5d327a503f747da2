use crate::io::WorkerPool;
use crate::protocol::CommandExecutor;
use crate::storage::Keyspace;
use crate::{
    config::Config,
    error::{Error, Result},
    network::Connection,
};
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SERVER: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

type ConnectionMap = HashMap<Token, (MioTcpStream, Connection)>;

/// Single-threaded key-value server
///
/// One event loop owns the listener, every connection and the key space.
/// The only other threads are the workers that free large values.
pub struct Server {
    config: Config,
    listener: TcpListener,
    shutdown: AtomicBool,
    active_connections: AtomicUsize,
}

impl Server {
    /// Validate `config` and bind the listening socket
    pub fn new(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let listener = TcpListener::bind(config.listen_addr())?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            listener,
            shutdown: AtomicBool::new(false),
            active_connections: AtomicUsize::new(0),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Signal the server to shut down gracefully
    pub fn shutdown(&self) {
        info!("Initiating server shutdown");
        self.shutdown.store(true, Ordering::Release);
    }

    /// Get the number of active client connections
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Run the event loop
    ///
    /// This method blocks until [`Server::shutdown`] is called.
    pub fn run(&self) -> Result<()> {
        let pool = WorkerPool::new(self.config.worker_threads)?;
        let keyspace = Keyspace::with_pool(
            self.config.index_policy(),
            pool,
            self.config.large_value_threshold,
        );
        let mut executor = CommandExecutor::new(keyspace);

        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(1024);

        let mut listener = MioTcpListener::from_std(self.listener.try_clone()?);
        poll.registry()
            .register(&mut listener, SERVER, Interest::READABLE)?;

        let mut connections = ConnectionMap::new();
        let mut next_token = 1usize;
        let mut scratch = vec![0u8; self.config.connection_buffer_size];

        info!("Server listening on {}", self.local_addr()?);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    SERVER => loop {
                        let (stream, addr) = match listener.accept() {
                            Ok(accepted) => accepted,
                            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                            Err(e) => {
                                error!("Error accepting connection: {}", e);
                                break;
                            }
                        };

                        if connections.len() >= self.config.max_connections {
                            warn!(
                                "Connection limit {} reached, dropping {}",
                                self.config.max_connections, addr
                            );
                            continue;
                        }

                        if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }

                        let token = Token(next_token);
                        next_token += 1;

                        let connection =
                            Connection::new(token.0, self.config.connection_buffer_size, Some(addr));
                        if register_connection(
                            poll.registry(),
                            &mut connections,
                            token,
                            stream,
                            connection,
                        ) {
                            debug!("New connection {} from {}", token.0, addr);
                            self.active_connections.fetch_add(1, Ordering::Relaxed);
                        }
                    },

                    token => {
                        if service_connection(
                            poll.registry(),
                            &mut connections,
                            token,
                            &mut executor,
                            &mut scratch,
                        ) {
                            self.active_connections.fetch_sub(1, Ordering::Relaxed);
                        }
                    }
                }
            }

            let expired = executor.expire_due(self.config.expire_batch);
            if expired > 0 {
                debug!("Reclaimed {} expired keys", expired);
            }
        }

        // Cleanup
        for (_, (mut stream, _)) in connections {
            let _ = poll.registry().deregister(&mut stream);
        }
        self.active_connections.store(0, Ordering::Release);
        let _ = poll.registry().deregister(&mut listener);

        info!(
            "Event loop stopped after {} commands",
            executor.commands_processed()
        );
        Ok(())
    }
}

/// Start tracking an accepted stream.
///
/// Returns false, dropping the stream, when it cannot be registered.
fn register_connection(
    registry: &Registry,
    connections: &mut ConnectionMap,
    token: Token,
    mut stream: MioTcpStream,
    connection: Connection,
) -> bool {
    if let Err(e) = registry.register(&mut stream, token, Interest::READABLE) {
        error!("Failed to register connection {}: {}", token.0, e);
        return false;
    }
    connections.insert(token, (stream, connection));
    true
}

/// Drive one connection after a readiness event.
///
/// Returns true when the connection was closed and dropped.
fn service_connection(
    registry: &Registry,
    connections: &mut ConnectionMap,
    token: Token,
    executor: &mut CommandExecutor,
    scratch: &mut [u8],
) -> bool {
    let Some((stream, connection)) = connections.get_mut(&token) else {
        return false;
    };

    let before = connection.interest();
    if let Err(e) = connection.handle_io(stream, executor, scratch) {
        match &e {
            Error::Io(err) if err.kind() == ErrorKind::ConnectionReset => {
                debug!("Connection {} reset by peer", token.0);
            }
            _ => error!("Connection {} failed: {}", token.0, e),
        }
        connection.close();
    }

    match connection.interest() {
        Some(interest) if Some(interest) != before => {
            if let Err(e) = registry.reregister(stream, token, interest) {
                error!("Failed to reregister connection {}: {}", token.0, e);
                connection.close();
            }
        }
        _ => {}
    }
    if connection.interest().is_some() {
        return false;
    }

    match connections.remove(&token) {
        Some((mut stream, connection)) => {
            let _ = registry.deregister(&mut stream);
            debug!(
                "Closing connection {} after {} requests",
                connection.connection_id, connection.requests_served
            );
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::encode_request;
    use crate::storage::IndexPolicy;
    use std::io::Read;
    use std::net::TcpStream;

    /// Connected (server side, client side) pair; the server side is nonblocking
    fn socket_pair() -> (MioTcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        (MioTcpStream::from_std(accepted), client)
    }

    fn executor() -> CommandExecutor {
        CommandExecutor::new(Keyspace::new(IndexPolicy::default()))
    }

    #[test]
    fn test_service_connection_keeps_open_connection() {
        let poll = Poll::new().unwrap();
        let mut executor = executor();
        let mut scratch = vec![0u8; 4096];
        let mut connections = ConnectionMap::new();

        let (stream, _client) = socket_pair();
        let token = Token(1);
        assert!(register_connection(
            poll.registry(),
            &mut connections,
            token,
            stream,
            Connection::new(1, 4096, None),
        ));

        // Nothing to read yet: the connection stays tracked
        assert!(!service_connection(
            poll.registry(),
            &mut connections,
            token,
            &mut executor,
            &mut scratch,
        ));
        assert_eq!(connections.len(), 1);
    }

    #[test]
    fn test_reregister_failure_drops_only_that_connection() {
        let poll = Poll::new().unwrap();
        let mut executor = executor();
        let mut scratch = vec![0u8; 4096];
        let mut connections = ConnectionMap::new();

        let (healthy, _healthy_client) = socket_pair();
        assert!(register_connection(
            poll.registry(),
            &mut connections,
            Token(1),
            healthy,
            Connection::new(1, 4096, None),
        ));

        // Never registered with the poll, so switching its interest fails
        let (stream, mut client) = socket_pair();
        let mut connection = Connection::new(2, 4096, None);
        let mut request = Vec::new();
        encode_request::<&[u8]>(&[b"get", b"k"], &mut request);
        connection.process_read(&request, &mut executor).unwrap();
        assert_eq!(connection.interest(), Some(Interest::WRITABLE));
        connections.insert(Token(2), (stream, connection));

        assert!(service_connection(
            poll.registry(),
            &mut connections,
            Token(2),
            &mut executor,
            &mut scratch,
        ));
        assert!(!connections.contains_key(&Token(2)));
        assert!(connections.contains_key(&Token(1)));

        // The reply flushed before the interest switch still arrived
        let mut header = [0u8; 4];
        client.read_exact(&mut header).unwrap();
        assert_eq!(u32::from_le_bytes(header), 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_register_failure_drops_stream() {
        use mio::unix::SourceFd;
        use std::os::unix::io::AsRawFd;

        let poll = Poll::new().unwrap();
        let mut connections = ConnectionMap::new();

        let (stream, mut client) = socket_pair();
        let fd = stream.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), Token(7), Interest::READABLE)
            .unwrap();

        assert!(!register_connection(
            poll.registry(),
            &mut connections,
            Token(1),
            stream,
            Connection::new(1, 4096, None),
        ));
        assert!(connections.is_empty());

        // The stream was dropped, so the peer sees the close
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
