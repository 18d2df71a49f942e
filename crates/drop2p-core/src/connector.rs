//! Rendezvous collaborator interface.
//!
//! Something outside this crate (typically a NAT hole-punching client) turns a
//! room id into a connected TCP stream. The session only needs the result.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info, warn};

/// Yields a connected stream for a room, or `None` if no peer could be reached.
pub trait Connector: Send + Sync {
    fn connect(&self, room: &str) -> Option<TcpStream>;
}

impl<F> Connector for F
where
    F: Fn(&str) -> Option<TcpStream> + Send + Sync,
{
    fn connect(&self, room: &str) -> Option<TcpStream> {
        self(room)
    }
}

/// Connector for peers that can already reach each other: one side listens,
/// the other dials. The room id is only logged.
#[derive(Debug, Clone)]
pub enum DirectConnector {
    Dial {
        addr: SocketAddr,
        timeout: Duration,
    },
    Listen {
        addr: SocketAddr,
    },
}

impl DirectConnector {
    pub fn dial(addr: SocketAddr) -> Self {
        DirectConnector::Dial {
            addr,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn listen(addr: SocketAddr) -> Self {
        DirectConnector::Listen { addr }
    }

    fn establish(&self) -> io::Result<TcpStream> {
        match self {
            DirectConnector::Dial { addr, timeout } => TcpStream::connect_timeout(addr, *timeout),
            DirectConnector::Listen { addr } => {
                let listener = TcpListener::bind(addr)?;
                info!("waiting for peer on {}", listener.local_addr()?);
                let (stream, peer) = listener.accept()?;
                debug!("accepted peer {}", peer);
                Ok(stream)
            }
        }
    }
}

impl Connector for DirectConnector {
    fn connect(&self, room: &str) -> Option<TcpStream> {
        match self.establish() {
            Ok(stream) => {
                info!(room, peer = ?stream.peer_addr().ok(), "direct connection established");
                Some(stream)
            }
            Err(e) => {
                warn!(room, "direct connection failed: {}", e);
                None
            }
        }
    }
}
