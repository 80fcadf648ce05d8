//! TCP server for STOMP connections.
//!
//! Accepts incoming connections and spawns one handler task per
//! connection. Each task owns its own frame parser.

use crate::config::Config;
use crate::protocols::stomp;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Pending connection backlog for the listening socket
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    config: Config,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            connection_limit,
        }
    }

    /// Bind the configured address and begin accepting connections
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = bind_listener(&self.config.listen)?;
        info!(address = %self.config.listen, "Server listening");

        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        let read_timeout = self.config.read_timeout();

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    tokio::spawn(async move {
                        match stomp::handle_connection(stream, addr, read_timeout).await {
                            Ok(frames) => debug!(peer = %addr, frames, "Connection finished"),
                            Err(e) => debug!(peer = %addr, error = %e, "Connection error"),
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Connection slots currently free
    pub fn available_connections(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// Create a TCP listener with SO_REUSEADDR set.
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(listen: &str) -> io::Result<TcpListener> {
    let addr: SocketAddr = listen.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid listen address '{}': {}", listen, e),
        )
    })?;

    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}
