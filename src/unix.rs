//! Unix-domain bindings for the stream endpoint, client and acceptor.

use std::future::Future;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{unix, UnixListener, UnixStream};
use tokio::time;
use tracing::{error, info, instrument};

use crate::acceptor::{Acceptor, Listener};
use crate::client::StreamClient;
use crate::config::Config;
use crate::error::SocketError;
use crate::handler::{AcceptHandler, ClientHandler};

pub type UnixAcceptor<H> = Acceptor<H, unix::SocketAddr>;

impl Listener for UnixListener {
    type Stream = UnixStream;

    fn accept_stream(&self) -> impl Future<Output = io::Result<UnixStream>> + Send {
        async move { UnixListener::accept(self).await.map(|(stream, _)| stream) }
    }
}

/// Binds the socket file at `path` and starts accepting.
pub fn listen<P, H>(path: P, handler: Arc<H>) -> Result<UnixAcceptor<H>, SocketError>
where
    P: AsRef<Path>,
    H: AcceptHandler<UnixStream> + ?Sized,
{
    let path = path.as_ref();
    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(err) => {
            error!("unix bind {} failed: {}", path.display(), err);
            return Err(err.into());
        }
    };
    let local_addr = listener.local_addr()?;
    info!("unix listener bound to {}", path.display());

    Ok(Acceptor::spawn(listener, local_addr, handler))
}

/// A Unix-domain client. Dereferences to [`StreamClient`] for writing and closing.
pub struct UnixClient<H: ?Sized> {
    client: StreamClient<H>,
}

impl<H: ClientHandler + ?Sized> UnixClient<H> {
    pub fn new(handler: Arc<H>, config: Config) -> Self {
        Self {
            client: StreamClient::new(handler, config),
        }
    }

    /// Dials the socket file at `path` with the configured idle deadline.
    pub async fn connect(&self, path: impl AsRef<Path>) -> Result<(), SocketError> {
        let idle_timeout = self.client.config().idle_timeout;
        self.connect_with_deadline(path, idle_timeout).await
    }

    #[instrument(name = "unix_connect", skip_all)]
    pub async fn connect_with_deadline(
        &self,
        path: impl AsRef<Path>,
        idle_timeout: Duration,
    ) -> Result<(), SocketError> {
        let path = path.as_ref();
        let timeout = self.client.config().connect_timeout;
        self.client
            .establish(
                path.display().to_string(),
                idle_timeout,
                dial(path, timeout),
            )
            .await
    }
}

impl<H: ?Sized> Deref for UnixClient<H> {
    type Target = StreamClient<H>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

async fn dial(path: &Path, timeout: Duration) -> Result<UnixStream, SocketError> {
    match time::timeout(timeout, UnixStream::connect(path)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(SocketError::ConnectTimeout(timeout)),
    }
}
