use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::Config;
use crate::deadline::IdleDeadline;
use crate::error::SocketError;
use crate::handler::{SessionHandler, StreamHandler};
use crate::lifecycle::{lock, Lifecycle};

// A full flush channel already holds a pending request, so further ones are dropped.
const FLUSH_REQUESTS: usize = 10;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// A duplex byte-stream connection driven by one reader task and one writer task.
///
/// Works over any connected stream (TCP, Unix-domain). Cloning is cheap and every clone
/// refers to the same connection.
pub struct StreamEndpoint<H: ?Sized> {
    inner: Arc<Inner<H>>,
}

impl<H: ?Sized> Clone for StreamEndpoint<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<H: ?Sized> {
    id: Uuid,
    lifecycle: Lifecycle,
    deadline: IdleDeadline,
    outbound: mpsc::Sender<Bytes>,
    flush_requests: mpsc::Sender<()>,
    read_chunk_size: usize,
    // Handle halves waiting for `start`.
    pending: Mutex<Option<Io>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    handler: Arc<H>,
}

struct Io {
    reader: BoxedReader,
    writer: BoxedWriter,
    outbound: mpsc::Receiver<Bytes>,
    flush_requests: mpsc::Receiver<()>,
}

impl<H: StreamHandler + ?Sized> StreamEndpoint<H> {
    /// Attaches `handler` to an already connected stream. Nothing runs until `start`; this
    /// leaves room for the handler to keep a clone of the endpoint before the first read.
    pub fn new<S>(stream: S, handler: Arc<H>, config: &Config) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.write_queue_capacity.max(1));
        let (flush_tx, flush_rx) = mpsc::channel(FLUSH_REQUESTS);

        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let io = Io {
            reader: Box::new(reader),
            writer: BufWriter::with_capacity(config.write_buffer_size, writer),
            outbound: outbound_rx,
            flush_requests: flush_rx,
        };

        let inner = Inner {
            id: Uuid::new_v4(),
            lifecycle: Lifecycle::new(),
            deadline: IdleDeadline::new(config.idle_timeout),
            outbound: outbound_tx,
            flush_requests: flush_tx,
            read_chunk_size: config.read_chunk_size.max(1),
            pending: Mutex::new(Some(io)),
            tasks: Mutex::new(Vec::with_capacity(2)),
            handler,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Opens the endpoint and spawns its reader and writer tasks. Only the first call has an
    /// effect.
    pub fn start(&self) {
        self.launch();
    }

    fn launch(&self) -> bool {
        let Some(io) = lock(&self.inner.pending).take() else {
            return false;
        };

        self.inner.lifecycle.open();
        self.inner.deadline.renew();

        let reader = tokio::spawn(read_loop(self.inner.clone(), io.reader));
        let writer = tokio::spawn(write_loop(
            self.inner.clone(),
            io.writer,
            io.outbound,
            io.flush_requests,
        ));
        lock(&self.inner.tasks).extend([reader, writer]);

        debug!(endpoint = %self.inner.id, "stream endpoint started");
        true
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }

    /// Queues `data` for the writer task.
    ///
    /// A closed endpoint silently ignores the call. When the queue is full the payload is
    /// dropped and `SocketError::QueueOverflow` is returned; already queued payloads are kept.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), SocketError> {
        self.inner.write(data.into())
    }

    pub fn write_str(&self, text: &str) -> Result<(), SocketError> {
        self.write(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Asks the writer task to drain its buffer. Does not wait for it.
    pub fn flush(&self) {
        self.inner.request_flush();
    }

    /// Closes the connection. Safe to call any number of times from anywhere, including from
    /// inside a callback; only the first call tears down and fires `on_close`.
    ///
    /// Pending writes are abandoned, even one blocked on a peer that stopped reading. Called
    /// from outside any endpoint callback, `close` waits for an `on_read` already running on
    /// this endpoint to return. Called from inside a callback it does not wait, so endpoints
    /// may close each other from their callbacks.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Changes the idle timeout. Applies from the next successful read or write.
    pub fn set_deadline(&self, timeout: Duration) {
        self.inner.deadline.set_timeout(timeout);
    }

    /// Waits for the reader and writer tasks to exit. Must not be awaited from inside a
    /// callback of the same endpoint.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl<H: SessionHandler + ?Sized> StreamEndpoint<H> {
    /// Starts an accepted connection and fires `on_start` once the loops are running.
    pub fn start_session(&self) {
        if self.launch() {
            self.inner.handler.on_start();
        }
    }
}

impl<H: StreamHandler + ?Sized> Inner<H> {
    fn write(&self, data: Bytes) -> Result<(), SocketError> {
        if self.lifecycle.is_closed() {
            return Ok(());
        }
        match self.outbound.try_send(data) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SocketError::QueueOverflow),
            Err(TrySendError::Closed(_)) => Ok(()),
        }
    }

    fn request_flush(&self) {
        let _ = self.flush_requests.try_send(());
    }

    fn close(&self) {
        if self.lifecycle.close() {
            debug!(endpoint = %self.id, "stream endpoint closed");
            self.handler.on_close();
        }
    }

    fn fail(&self, err: SocketError) {
        if !self.lifecycle.is_closed() {
            debug!(endpoint = %self.id, "stream endpoint failed: {}", err);
            self.handler.on_exception(&err);
        }
        self.close();
    }
}

async fn read_loop<H>(inner: Arc<Inner<H>>, mut reader: BoxedReader)
where
    H: StreamHandler + ?Sized,
{
    let mut buf = vec![0u8; inner.read_chunk_size];

    loop {
        let read = tokio::select! {
            biased;
            _ = inner.lifecycle.closed() => break,
            _ = inner.deadline.expired() => Err(SocketError::IdleTimeout(inner.deadline.timeout())),
            read = reader.read(&mut buf) => match read {
                Ok(0) => Err(SocketError::PeerClosed),
                Ok(n) => Ok(n),
                Err(err) => Err(err.into()),
            },
        };

        match read {
            Ok(n) => {
                trace!(endpoint = %inner.id, "read {} bytes", n);
                if !inner.lifecycle.deliver(|| inner.handler.on_read(&buf[..n])) {
                    break;
                }
                inner.deadline.renew();
            }
            Err(err) => {
                inner.fail(err);
                break;
            }
        }
    }

    debug!(endpoint = %inner.id, "read loop exited");
}

async fn write_loop<H>(
    inner: Arc<Inner<H>>,
    mut writer: BoxedWriter,
    mut outbound: mpsc::Receiver<Bytes>,
    mut flush_requests: mpsc::Receiver<()>,
) where
    H: StreamHandler + ?Sized,
{
    loop {
        let op = tokio::select! {
            biased;
            _ = inner.lifecycle.closed() => break,
            Some(data) = outbound.recv() => WriteOp::Payload(data),
            Some(()) = flush_requests.recv() => WriteOp::Flush,
        };

        // Shutdown must also interrupt a write parked on a peer that stopped reading.
        let io = async {
            match op {
                WriteOp::Payload(data) => write_payload(&inner, &mut writer, data).await,
                WriteOp::Flush => flush_buffer(&inner, &mut writer).await,
            }
        };
        let outcome = tokio::select! {
            biased;
            _ = inner.lifecycle.closed() => break,
            outcome = io => outcome,
        };

        if let Err(err) = outcome {
            inner.fail(err);
            break;
        }
    }

    debug!(endpoint = %inner.id, "write loop exited");
}

enum WriteOp {
    Payload(Bytes),
    Flush,
}

async fn write_payload<H>(
    inner: &Inner<H>,
    writer: &mut BoxedWriter,
    data: Bytes,
) -> Result<(), SocketError>
where
    H: StreamHandler + ?Sized,
{
    let write = write_through(writer, &data);
    let needs_flush = if inner.deadline.is_disabled() {
        write.await?
    } else {
        time::timeout_at(inner.deadline.expires_at(), write)
            .await
            .map_err(|_| SocketError::IdleTimeout(inner.deadline.timeout()))??
    };

    if needs_flush {
        inner.request_flush();
    } else {
        inner.deadline.renew();
    }
    Ok(())
}

/// Writes straight to the handle when nothing is buffered, otherwise appends to the buffer.
/// Returns whether bytes were left in the buffer and need a flush.
async fn write_through(writer: &mut BoxedWriter, data: &[u8]) -> io::Result<bool> {
    if writer.buffer().is_empty() {
        let n = writer.get_mut().write(data).await?;
        if n == 0 && !data.is_empty() {
            return Err(io::ErrorKind::WriteZero.into());
        }
        if n < data.len() {
            writer.write_all(&data[n..]).await?;
            return Ok(true);
        }
        return Ok(false);
    }

    writer.write_all(data).await?;
    Ok(true)
}

async fn flush_buffer<H>(inner: &Inner<H>, writer: &mut BoxedWriter) -> Result<(), SocketError>
where
    H: StreamHandler + ?Sized,
{
    let flush = writer.flush();
    let flushed = if inner.deadline.is_disabled() {
        flush.await
    } else {
        match time::timeout_at(inner.deadline.expires_at(), flush).await {
            Ok(flushed) => flushed,
            Err(_) => return Err(SocketError::IdleTimeout(inner.deadline.timeout())),
        }
    };

    match flushed {
        Ok(()) => {
            inner.deadline.renew();
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::WriteZero => {
            // Short flush, try again on the next turn.
            inner.request_flush();
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
