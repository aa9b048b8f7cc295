//! Network Client
//!
//! Fire-and-forget delivery to peer nodes over cached TCP connections.

use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::write_message;
use crate::network::Message;
use crate::error::{Error, Result};

/// Network client for sending to peer nodes
pub struct NetworkClient {
    /// Cached connections: address -> stream
    connections: HashMap<String, TcpStream>,
    /// Connection timeout
    connect_timeout: Duration,
    /// Write timeout
    write_timeout: Duration,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            connect_timeout,
            write_timeout,
        }
    }

    /// Send a message without waiting for any reply.
    ///
    /// A cached connection that fails is dropped and re-dialled once.
    pub async fn send(&mut self, address: &str, message: &Message) -> Result<()> {
        if let Some(mut stream) = self.connections.remove(address) {
            match self.write(&mut stream, address, message).await {
                Ok(()) => {
                    self.connections.insert(address.to_string(), stream);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("Dropping connection to {}: {}", address, e);
                }
            }
        }

        let mut stream = self.connect(address).await?;
        self.write(&mut stream, address, message).await?;
        self.connections.insert(address.to_string(), stream);
        Ok(())
    }

    async fn write(&self, stream: &mut TcpStream, address: &str, message: &Message) -> Result<()> {
        match timeout(self.write_timeout, write_message(stream, message)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(
            self.connect_timeout,
            TcpStream::connect(address),
        ).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Close all connections
    pub fn close_all(&mut self) {
        self.connections.clear();
    }

    /// Get connection count
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
