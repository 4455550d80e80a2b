use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::SocketError;
use crate::handler::ClientHandler;
use crate::lifecycle::lock;
use crate::stream::StreamEndpoint;

/// Client side stream that can be dialed, and re-dialed, over its lifetime.
///
/// Each successful dial attaches a fresh [`StreamEndpoint`]. Before a new handle replaces
/// the old one the previous endpoint is closed and both of its tasks are awaited, so a stale
/// task can never touch the new connection. Transport specific dialing lives in
/// [`crate::tcp::TcpClient`] and [`crate::unix::UnixClient`].
pub struct StreamClient<H: ?Sized> {
    handler: Arc<H>,
    config: Config,
    current: Mutex<Option<StreamEndpoint<H>>>,
    remote_addr: Mutex<Option<String>>,
    dialing: tokio::sync::Mutex<()>,
}

impl<H: ClientHandler + ?Sized> StreamClient<H> {
    pub fn new(handler: Arc<H>, config: Config) -> Self {
        Self {
            handler,
            config,
            current: Mutex::new(None),
            remote_addr: Mutex::new(None),
            dialing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Address passed to the most recent dial.
    pub fn remote_addr(&self) -> Option<String> {
        lock(&self.remote_addr).clone()
    }

    /// The endpoint of the current connection, if one was ever established.
    pub fn endpoint(&self) -> Option<StreamEndpoint<H>> {
        lock(&self.current).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.endpoint().map_or(true, |endpoint| endpoint.is_closed())
    }

    /// See [`StreamEndpoint::write`]. Not being connected counts as closed.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), SocketError> {
        match self.endpoint() {
            Some(endpoint) => endpoint.write(data),
            None => Ok(()),
        }
    }

    pub fn write_str(&self, text: &str) -> Result<(), SocketError> {
        match self.endpoint() {
            Some(endpoint) => endpoint.write_str(text),
            None => Ok(()),
        }
    }

    pub fn flush(&self) {
        if let Some(endpoint) = self.endpoint() {
            endpoint.flush();
        }
    }

    pub fn close(&self) {
        if let Some(endpoint) = self.endpoint() {
            endpoint.close();
        }
    }

    pub fn set_deadline(&self, timeout: Duration) {
        if let Some(endpoint) = self.endpoint() {
            endpoint.set_deadline(timeout);
        }
    }

    /// Runs `dial` and attaches the resulting stream. Blocks until the dial resolves;
    /// `on_connect` reports the outcome either way.
    pub(crate) async fn establish<S, F>(
        &self,
        remote: String,
        idle_timeout: Duration,
        dial: F,
    ) -> Result<(), SocketError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: Future<Output = Result<S, SocketError>>,
    {
        let _dialing = self.dialing.lock().await;

        let stream = match dial.await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("connect to {} failed: {}", remote, err);
                self.handler.on_connect(false);
                return Err(err);
            }
        };

        let previous = lock(&self.current).take();
        if let Some(previous) = previous {
            previous.close();
            previous.join().await;
        }

        let endpoint = StreamEndpoint::new(stream, self.handler.clone(), &self.config);
        endpoint.set_deadline(idle_timeout);
        endpoint.start();
        debug!(endpoint = %endpoint.id(), "connected to {}", remote);

        *lock(&self.current) = Some(endpoint);
        *lock(&self.remote_addr) = Some(remote);

        self.handler.on_connect(true);
        Ok(())
    }
}
