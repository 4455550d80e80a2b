use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::SocketError;
use crate::handler::{AcceptHandler, EventHandler};
use crate::lifecycle::{lock, Lifecycle};

/// A bound listening socket that yields connected streams.
pub trait Listener: Send + Sync + 'static {
    type Stream: Send + 'static;

    fn accept_stream(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Owns a listening socket and runs its accept loop.
///
/// The acceptor only admits connections: every accepted stream goes to
/// [`AcceptHandler::on_accept`], which decides how to run it.
pub struct Acceptor<H: ?Sized, A> {
    inner: Arc<Inner<H>>,
    local_addr: A,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<H: ?Sized> {
    lifecycle: Lifecycle,
    handler: Arc<H>,
}

impl<H: ?Sized, A> Acceptor<H, A> {
    /// Opens the acceptor, fires `on_start` and spawns the accept loop.
    pub(crate) fn spawn<L>(listener: L, local_addr: A, handler: Arc<H>) -> Self
    where
        L: Listener,
        H: AcceptHandler<L::Stream>,
    {
        let inner = Arc::new(Inner {
            lifecycle: Lifecycle::new(),
            handler,
        });
        inner.lifecycle.open();
        inner.handler.on_start();

        let task = tokio::spawn(accept_loop(listener, inner.clone()));

        Self {
            inner,
            local_addr,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn local_addr(&self) -> &A {
        &self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }

    /// Waits for the accept loop to exit.
    pub async fn join(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl<H: EventHandler + ?Sized, A> Acceptor<H, A> {
    /// Stops accepting and releases the listening socket. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl<H: EventHandler + ?Sized> Inner<H> {
    fn close(&self) {
        if self.lifecycle.close() {
            debug!("acceptor closed");
            self.handler.on_close();
        }
    }
}

async fn accept_loop<L, H>(listener: L, inner: Arc<Inner<H>>)
where
    L: Listener,
    H: AcceptHandler<L::Stream> + ?Sized,
{
    loop {
        let accepted = tokio::select! {
            biased;
            _ = inner.lifecycle.closed() => break,
            accepted = listener.accept_stream() => accepted,
        };

        match accepted {
            Ok(stream) => {
                if !inner.lifecycle.deliver(|| inner.handler.on_accept(stream)) {
                    break;
                }
            }
            Err(err) => {
                error!("accept failed: {}", err);
                if !inner.lifecycle.is_closed() {
                    inner.handler.on_exception(&SocketError::from(err));
                }
                inner.close();
                break;
            }
        }
    }

    debug!("accept loop exited");
}
