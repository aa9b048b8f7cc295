//! Network Server
//!
//! TCP server for accepting connections from other nodes and clients.

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use super::read_message;
use crate::network::Message;
use crate::error::{Error, Result};

/// Network server for cluster communication
pub struct NetworkServer {
    /// Bound listener
    listener: TcpListener,
    /// Channel for incoming messages
    incoming_tx: mpsc::Sender<Message>,
}

impl NetworkServer {
    /// Bind the server to an address
    pub async fn bind(bind_address: &str, incoming_tx: mpsc::Sender<Message>) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        Ok(Self {
            listener,
            incoming_tx,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("Network server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let incoming_tx = self.incoming_tx.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, peer_addr.clone(), incoming_tx).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Network server stopped");
        Ok(())
    }
}

/// Handle a single connection
async fn handle_connection(
    socket: TcpStream,
    peer_addr: String,
    incoming_tx: mpsc::Sender<Message>,
) -> Result<()> {
    let (mut reader, _writer) = socket.into_split();

    loop {
        match read_message(&mut reader).await {
            Ok(message) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer_addr);

                if incoming_tx.send(message).await.is_err() {
                    return Err(Error::ShuttingDown);
                }
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
