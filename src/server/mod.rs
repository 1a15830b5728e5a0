use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config;
use crate::wire::codec::{self, CodecError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub listen_backlog: u32,
}

impl From<&config::ServerConfig> for ServerConfig {
    fn from(value: &config::ServerConfig) -> Self {
        Self {
            host: value.host.clone(),
            port: value.port,
            listen_backlog: value.listen_backlog,
        }
    }
}

#[derive(Debug)]
pub enum ServerError {
    Bind {
        address: String,
        source: io::Error,
    },
    SetNonBlocking {
        source: io::Error,
    },
    Accept {
        source: io::Error,
    },
    ConfigureAcceptedStream {
        source: io::Error,
    },
    StreamClone {
        source: io::Error,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, source } => {
                write!(f, "failed to bind TCP server on {address}: {source}")
            }
            Self::SetNonBlocking { source } => {
                write!(f, "failed to set TCP listener to non-blocking mode: {source}")
            }
            Self::Accept { source } => write!(f, "failed to accept agency connection: {source}"),
            Self::ConfigureAcceptedStream { source } => {
                write!(f, "failed to configure accepted TCP stream: {source}")
            }
            Self::StreamClone { source } => {
                write!(f, "failed to clone accepted TCP stream for shutdown tracking: {source}")
            }
        }
    }
}

impl std::error::Error for ServerError {}

/// Shutdown handles of every live agency socket.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl ConnectionRegistry {
    fn track(&self, id: u64, stream: TcpStream) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, stream);
    }

    fn release(&self, id: u64) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Unblocks handlers stuck in a frame read. Write halves stay open so a
    /// handler can still send its final zero ack.
    pub fn shutdown_reads(&self) -> usize {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        for stream in streams.values() {
            let _ = stream.shutdown(Shutdown::Read);
        }
        streams.len()
    }
}

/// Blocking socket owned by exactly one agency handler. Dropping it closes
/// the socket and forgets its shutdown handle.
pub struct AgencyConnection {
    id: u64,
    peer_addr: SocketAddr,
    stream: TcpStream,
    registry: Arc<ConnectionRegistry>,
}

impl AgencyConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn read_frame(&mut self) -> Result<Vec<u8>, CodecError> {
        codec::read_frame(&mut self.stream)
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        self.stream.write_all(payload).map_err(CodecError::Io)?;
        self.stream.flush().map_err(CodecError::Io)
    }
}

impl Drop for AgencyConnection {
    fn drop(&mut self) {
        self.registry.release(self.id);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl fmt::Debug for AgencyConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgencyConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

pub struct TcpServer {
    listener: TcpListener,
    listen_backlog: u32,
    next_connection_id: AtomicU64,
    registry: Arc<ConnectionRegistry>,
}

impl TcpServer {
    /// The listener is non-blocking so the accept loop can keep polling the
    /// stop flag.
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
            address,
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::SetNonBlocking { source })?;

        Ok(Self {
            listener,
            listen_backlog: config.listen_backlog,
            next_connection_id: AtomicU64::new(1),
            registry: Arc::new(ConnectionRegistry::default()),
        })
    }

    pub fn from_app_config(app_config: &config::AppConfig) -> Result<Self, ServerError> {
        Self::bind(&ServerConfig::from(&app_config.server))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn listen_backlog(&self) -> u32 {
        self.listen_backlog
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn try_accept(&self) -> Result<Option<AgencyConnection>, ServerError> {
        let (stream, peer_addr) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(source) if source.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(source) if source.kind() == io::ErrorKind::Interrupted => return Ok(None),
            Err(source) => return Err(ServerError::Accept { source }),
        };

        stream
            .set_nonblocking(false)
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;
        stream
            .set_nodelay(true)
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;
        let shutdown_handle = stream
            .try_clone()
            .map_err(|source| ServerError::StreamClone { source })?;

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.registry.track(id, shutdown_handle);

        Ok(Some(AgencyConnection {
            id,
            peer_addr,
            stream,
            registry: Arc::clone(&self.registry),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;

    use crate::config::AppConfig;

    use super::{AgencyConnection, ServerConfig, TcpServer};

    fn local_server() -> TcpServer {
        TcpServer::bind(&ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            listen_backlog: 5,
        })
        .expect("server should bind")
    }

    fn accept_within(server: &TcpServer, attempts: usize) -> AgencyConnection {
        for _ in 0..attempts {
            if let Some(connection) = server.try_accept().expect("accept poll should not fail") {
                return connection;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("server did not accept a connection in time");
    }

    #[test]
    fn listener_does_not_block_without_clients() {
        let server = local_server();
        assert!(server
            .try_accept()
            .expect("poll should not fail")
            .is_none());
    }

    #[test]
    fn accepted_connection_is_tracked_until_dropped() {
        let server = local_server();
        let addr = server.local_addr().expect("local addr should exist");
        let mut client = TcpStream::connect(addr).expect("client should connect");

        let mut connection = accept_within(&server, 50);
        assert_eq!(connection.id(), 1);
        assert_eq!(server.registry().live_count(), 1);

        connection.send(&[0, 0, 0, 7]).expect("send should work");
        let mut ack = [0_u8; 4];
        client.read_exact(&mut ack).expect("client should read ack");
        assert_eq!(u32::from_be_bytes(ack), 7);

        drop(connection);
        assert_eq!(server.registry().live_count(), 0);

        let mut rest = Vec::new();
        let read = client.read_to_end(&mut rest).expect("closed socket reads eof");
        assert_eq!(read, 0);
    }

    #[test]
    fn shutdown_reads_unblocks_pending_frame_read() {
        let server = local_server();
        let addr = server.local_addr().expect("local addr should exist");
        let mut client = TcpStream::connect(addr).expect("client should connect");
        let mut connection = accept_within(&server, 50);
        let registry = server.registry();

        let reader = thread::spawn(move || {
            let result = connection.read_frame();
            (connection, result)
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(registry.shutdown_reads(), 1);

        let (mut connection, result) = reader.join().expect("reader should not panic");
        let error = result.expect_err("read should fail after shutdown");
        assert!(error.is_connection_error());

        connection.send(&[0, 0, 0, 0]).expect("write half stays open");
        let mut ack = [0_u8; 4];
        client.read_exact(&mut ack).expect("client should read zero ack");
        assert_eq!(ack, [0, 0, 0, 0]);
    }

    #[test]
    fn builds_server_from_app_config() {
        let mut app_config = AppConfig::default();
        app_config.server.host = "127.0.0.1".to_owned();
        app_config.server.port = 0;

        let server = TcpServer::from_app_config(&app_config).expect("server should build");
        let bound = server.local_addr().expect("bound address should be present");
        assert_eq!(bound.ip().to_string(), "127.0.0.1");
        assert_eq!(server.listen_backlog(), 5);
    }
}
