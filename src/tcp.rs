//! TCP bindings for the stream endpoint, client and acceptor.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream, ToSocketAddrs};
use tokio::time;
use tracing::{error, info, instrument};

use crate::acceptor::{Acceptor, Listener};
use crate::client::StreamClient;
use crate::config::Config;
use crate::error::SocketError;
use crate::handler::{AcceptHandler, ClientHandler};

pub type TcpAcceptor<H> = Acceptor<H, SocketAddr>;

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept_stream(&self) -> impl Future<Output = io::Result<TcpStream>> + Send {
        async move { TcpListener::accept(self).await.map(|(stream, _)| stream) }
    }
}

/// Binds `addr` and starts accepting. A bind failure is returned without firing any
/// callback.
pub async fn listen<A, H>(addr: A, handler: Arc<H>) -> Result<TcpAcceptor<H>, SocketError>
where
    A: ToSocketAddrs,
    H: AcceptHandler<TcpStream> + ?Sized,
{
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("tcp bind failed: {}", err);
            return Err(err.into());
        }
    };
    let local_addr = listener.local_addr()?;
    info!("tcp listener bound to {}", local_addr);

    Ok(Acceptor::spawn(listener, local_addr, handler))
}

/// A TCP client. Dereferences to [`StreamClient`] for writing and closing.
pub struct TcpClient<H: ?Sized> {
    client: StreamClient<H>,
}

impl<H: ClientHandler + ?Sized> TcpClient<H> {
    pub fn new(handler: Arc<H>, config: Config) -> Self {
        Self {
            client: StreamClient::new(handler, config),
        }
    }

    /// Dials `addr` with the configured connect timeout and idle deadline.
    pub async fn connect(&self, addr: &str) -> Result<(), SocketError> {
        let config = self.client.config();
        self.connect_timeout(addr, config.connect_timeout, config.idle_timeout)
            .await
    }

    #[instrument(name = "tcp_connect", skip(self))]
    pub async fn connect_timeout(
        &self,
        addr: &str,
        timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<(), SocketError> {
        self.client
            .establish(addr.to_string(), idle_timeout, dial(addr, timeout))
            .await
    }

    /// Dials `addr` from the given local address.
    #[instrument(name = "tcp_connect_from", skip(self))]
    pub async fn connect_from(
        &self,
        local: SocketAddr,
        addr: &str,
        timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<(), SocketError> {
        self.client
            .establish(
                addr.to_string(),
                idle_timeout,
                dial_from(local, addr, timeout),
            )
            .await
    }
}

impl<H: ?Sized> Deref for TcpClient<H> {
    type Target = StreamClient<H>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream, SocketError> {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(SocketError::ConnectTimeout(timeout)),
    }
}

async fn dial_from(
    local: SocketAddr,
    addr: &str,
    timeout: Duration,
) -> Result<TcpStream, SocketError> {
    let remote = lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"))?;

    let socket = if local.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(local)?;

    match time::timeout(timeout, socket.connect(remote)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(SocketError::ConnectTimeout(timeout)),
    }
}
