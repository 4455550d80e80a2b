use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SocketError;
use crate::handler::DatagramHandler;
use crate::lifecycle::{lock, Lifecycle};

/// A datagram waiting in the outbound queue.
#[derive(Debug)]
struct Outbound {
    payload: Bytes,
    target: SocketAddr,
}

/// A bound UDP socket with the same queueing discipline as [`crate::StreamEndpoint`], but
/// every write names its destination and every send is a single datagram.
pub struct UdpEndpoint<H: ?Sized> {
    inner: Arc<Inner<H>>,
    local_addr: SocketAddr,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner<H: ?Sized> {
    lifecycle: Lifecycle,
    outbound: mpsc::Sender<Outbound>,
    // Datagrams accepted by `write_to` but not yet handed to the socket.
    in_flight: AtomicUsize,
    drained: Notify,
    handler: Arc<H>,
}

impl<H: DatagramHandler + ?Sized> UdpEndpoint<H> {
    /// Binds `addr`, fires `on_start` and spawns the reader and writer tasks.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        handler: Arc<H>,
        config: &Config,
    ) -> Result<Self, SocketError> {
        let socket = match UdpSocket::bind(addr).await {
            Ok(socket) => Arc::new(socket),
            Err(err) => {
                error!("udp bind failed: {}", err);
                return Err(err.into());
            }
        };
        let local_addr = socket.local_addr()?;
        info!("udp socket bound to {}", local_addr);

        let (outbound_tx, outbound_rx) = mpsc::channel(config.datagram_queue_capacity.max(1));
        let inner = Arc::new(Inner {
            lifecycle: Lifecycle::new(),
            outbound: outbound_tx,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            handler,
        });

        inner.lifecycle.open();
        inner.handler.on_start();

        let reader = tokio::spawn(read_loop(
            inner.clone(),
            socket.clone(),
            config.read_chunk_size.max(1),
        ));
        let writer = tokio::spawn(write_loop(inner.clone(), socket, outbound_rx));

        Ok(Self {
            inner,
            local_addr,
            tasks: Mutex::new(vec![reader, writer]),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }

    /// Queues one datagram for `target`. Same contract as [`crate::StreamEndpoint::write`].
    pub fn write_to(&self, data: impl Into<Bytes>, target: SocketAddr) -> Result<(), SocketError> {
        if self.inner.lifecycle.is_closed() {
            return Ok(());
        }

        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let datagram = Outbound {
            payload: data.into(),
            target,
        };
        match self.inner.outbound.try_send(datagram) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.sent();
                match err {
                    TrySendError::Full(_) => Err(SocketError::QueueOverflow),
                    TrySendError::Closed(_) => Ok(()),
                }
            }
        }
    }

    /// Resolves once every queued datagram has been handed to the socket, or the endpoint
    /// closes.
    pub async fn flush(&self) {
        loop {
            let drained = self.inner.drained.notified();
            if self.inner.in_flight.load(Ordering::Acquire) == 0 || self.is_closed() {
                return;
            }
            tokio::select! {
                _ = drained => {}
                _ = self.inner.lifecycle.closed() => return,
            }
        }
    }

    /// Idempotent. Fires `on_close` once.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Waits for the reader and writer tasks to exit.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl<H: DatagramHandler + ?Sized> Inner<H> {
    fn sent(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn close(&self) {
        if self.lifecycle.close() {
            debug!("udp endpoint closed");
            self.handler.on_close();
        }
    }
}

async fn read_loop<H>(inner: Arc<Inner<H>>, socket: Arc<UdpSocket>, chunk_size: usize)
where
    H: DatagramHandler + ?Sized,
{
    let mut buf = vec![0u8; chunk_size];

    loop {
        let received = tokio::select! {
            biased;
            _ = inner.lifecycle.closed() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((n, from)) => {
                if !inner.lifecycle.deliver(|| inner.handler.on_read(&buf[..n], from)) {
                    break;
                }
            }
            Err(err) => {
                if !inner.lifecycle.is_closed() {
                    debug!("udp receive failed: {}", err);
                    inner.handler.on_exception(&SocketError::from(err));
                }
                inner.close();
                break;
            }
        }
    }

    debug!("udp read loop exited");
}

async fn write_loop<H>(
    inner: Arc<Inner<H>>,
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::Receiver<Outbound>,
) where
    H: DatagramHandler + ?Sized,
{
    loop {
        let datagram = tokio::select! {
            biased;
            _ = inner.lifecycle.closed() => break,
            Some(datagram) = outbound.recv() => datagram,
        };

        // A failed send drops that datagram only; the socket stays open.
        if let Err(err) = socket.send_to(&datagram.payload, datagram.target).await {
            warn!(
                "udp send of {} bytes to {} failed, datagram dropped: {}",
                datagram.payload.len(),
                datagram.target,
                err
            );
        }
        inner.sent();
    }

    debug!("udp write loop exited");
}
