#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time;

use netbase::{
    AcceptHandler, ClientHandler, Config, DatagramHandler, EventHandler, SessionHandler,
    SocketError, StreamEndpoint, StreamHandler,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    Connect(bool),
    Read(Vec<u8>),
    Datagram(Vec<u8>, SocketAddr),
    Exception(String),
    Close,
}

/// Forwards every callback it receives to a channel the test reads from.
pub struct Recorder {
    events: UnboundedSender<Event>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events: tx }), rx)
    }

    fn record(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

impl EventHandler for Recorder {
    fn on_close(&self) {
        self.record(Event::Close);
    }

    fn on_exception(&self, err: &SocketError) {
        self.record(Event::Exception(err.to_string()));
    }
}

impl StreamHandler for Recorder {
    fn on_read(&self, data: &[u8]) {
        self.record(Event::Read(data.to_vec()));
    }
}

impl ClientHandler for Recorder {
    fn on_connect(&self, connected: bool) {
        self.record(Event::Connect(connected));
    }
}

/// Same as [`Recorder`] for datagram sockets.
pub struct DatagramRecorder {
    events: UnboundedSender<Event>,
}

impl DatagramRecorder {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events: tx }), rx)
    }
}

impl EventHandler for DatagramRecorder {
    fn on_close(&self) {
        let _ = self.events.send(Event::Close);
    }

    fn on_exception(&self, err: &SocketError) {
        let _ = self.events.send(Event::Exception(err.to_string()));
    }
}

impl DatagramHandler for DatagramRecorder {
    fn on_start(&self) {
        let _ = self.events.send(Event::Start);
    }

    fn on_read(&self, data: &[u8], from: SocketAddr) {
        let _ = self.events.send(Event::Datagram(data.to_vec(), from));
    }
}

/// Server side session that writes back whatever it reads.
pub struct Echo {
    endpoint: Mutex<Option<StreamEndpoint<Echo>>>,
    events: UnboundedSender<Event>,
}

impl EventHandler for Echo {
    fn on_close(&self) {
        self.endpoint.lock().unwrap().take();
        let _ = self.events.send(Event::Close);
    }

    fn on_exception(&self, err: &SocketError) {
        let _ = self.events.send(Event::Exception(err.to_string()));
    }
}

impl StreamHandler for Echo {
    fn on_read(&self, data: &[u8]) {
        let endpoint = self.endpoint.lock().unwrap().clone();
        if let Some(endpoint) = endpoint {
            endpoint.write(data.to_vec()).unwrap();
        }
    }
}

impl SessionHandler for Echo {
    fn on_start(&self) {
        let _ = self.events.send(Event::Start);
    }
}

/// Accepts connections and runs an [`Echo`] session on each.
pub struct EchoServer {
    config: Config,
    events: UnboundedSender<Event>,
    listener_events: UnboundedSender<Event>,
}

/// Receivers for an [`EchoServer`]: one for the listener's own callbacks, one shared by all
/// of its sessions.
pub struct EchoEvents {
    pub listener: UnboundedReceiver<Event>,
    pub sessions: UnboundedReceiver<Event>,
}

impl EchoServer {
    pub fn new() -> (Arc<Self>, EchoEvents) {
        let (tx, sessions) = mpsc::unbounded_channel();
        let (listener_tx, listener) = mpsc::unbounded_channel();
        let server = EchoServer {
            config: Config::default(),
            events: tx,
            listener_events: listener_tx,
        };
        (Arc::new(server), EchoEvents { listener, sessions })
    }
}

impl EventHandler for EchoServer {
    fn on_close(&self) {
        let _ = self.listener_events.send(Event::Close);
    }

    fn on_exception(&self, err: &SocketError) {
        let _ = self.listener_events.send(Event::Exception(err.to_string()));
    }
}

impl<S> AcceptHandler<S> for EchoServer
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn on_start(&self) {
        let _ = self.listener_events.send(Event::Start);
    }

    fn on_accept(&self, stream: S) {
        let session = Arc::new(Echo {
            endpoint: Mutex::new(None),
            events: self.events.clone(),
        });
        let endpoint = StreamEndpoint::new(stream, session.clone(), &self.config);
        *session.endpoint.lock().unwrap() = Some(endpoint.clone());
        endpoint.start_session();
    }
}

pub async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Event {
    time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Collects `Read` events until `len` bytes have arrived.
pub async fn read_bytes(rx: &mut UnboundedReceiver<Event>, len: usize) -> Vec<u8> {
    let mut received = Vec::with_capacity(len);
    while received.len() < len {
        match next_event(rx).await {
            Event::Read(data) => received.extend_from_slice(&data),
            event => panic!("unexpected event: {:?}", event),
        }
    }
    received
}

/// Events already delivered, without waiting for more.
pub fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
