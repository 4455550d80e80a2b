//! Callback capabilities an application attaches to endpoints.
//!
//! Each role asks only for the capabilities it fires: a plain stream needs [`StreamHandler`],
//! a server-side session additionally needs [`SessionHandler::on_start`], a client needs
//! [`ClientHandler::on_connect`]. The compiler checks the capability when the handler is
//! attached, so there is no need for empty placeholder callbacks.
//!
//! Callbacks run on the endpoint's background tasks and must not block for long. A handler
//! that wants to write back from `on_read` usually keeps a clone of its endpoint and drops it
//! in `on_close`, which breaks the reference cycle.

use std::net::SocketAddr;

use crate::error::SocketError;

/// Lifecycle notifications shared by every endpoint kind.
pub trait EventHandler: Send + Sync + 'static {
    /// Fired exactly once, during teardown.
    fn on_close(&self);

    /// Fired for I/O failures. Always followed by `on_close`.
    fn on_exception(&self, err: &SocketError);
}

pub trait StreamHandler: EventHandler {
    /// Receives the exact bytes returned by one read.
    fn on_read(&self, data: &[u8]);
}

pub trait SessionHandler: StreamHandler {
    /// Fired once the reader and writer tasks of an accepted connection are running.
    fn on_start(&self);
}

pub trait ClientHandler: StreamHandler {
    /// Fired once per dial attempt with its outcome.
    ///
    /// On success the endpoint is already running when this fires, so `on_read` for the new
    /// connection may be delivered before `on_connect(true)`.
    fn on_connect(&self, connected: bool);
}

/// Listener side callbacks. `S` is the connection type the listener produces.
pub trait AcceptHandler<S>: EventHandler {
    /// Fired once the listener is bound, before the first accept.
    fn on_start(&self);

    /// Receives every accepted connection. Wrapping it in an endpoint is up to the handler.
    fn on_accept(&self, stream: S);
}

pub trait DatagramHandler: EventHandler {
    /// Fired once the socket is bound.
    fn on_start(&self);

    /// Receives one datagram and its sender.
    fn on_read(&self, data: &[u8], from: SocketAddr);
}
