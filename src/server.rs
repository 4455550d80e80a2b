//! A small RESP server assembled from the endpoint and decoder building blocks. It answers
//! `PING`, `ECHO` and `CLIENT`; everything else gets an error reply.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::decoder::RespDecoder;
use crate::error::SocketError;
use crate::frame::Frame;
use crate::handler::{AcceptHandler, EventHandler, SessionHandler, StreamHandler};
use crate::lifecycle::lock;
use crate::stream::StreamEndpoint;
use crate::tcp;
use crate::Error;

pub async fn run(port: u16, config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let acceptor = tcp::listen(("127.0.0.1", port), Arc::new(Server { config })).await?;
    info!("RESP server listening on {}", acceptor.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    acceptor.close();
    acceptor.join().await;

    Ok(())
}

struct Server {
    config: Config,
}

impl EventHandler for Server {
    fn on_close(&self) {
        info!("Listener closed");
    }

    fn on_exception(&self, err: &SocketError) {
        error!("Listener failed: {}", err);
    }
}

impl AcceptHandler<TcpStream> for Server {
    fn on_start(&self) {
        debug!("Accept loop started");
    }

    fn on_accept(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let session = Arc::new(Session::new(peer, &self.config));
        let endpoint = StreamEndpoint::new(stream, session.clone(), &self.config);
        session.attach(endpoint.clone());
        endpoint.start_session();
    }
}

/// One client connection. Owns the decoder for that connection's byte stream.
struct Session {
    peer: String,
    decoder: Mutex<RespDecoder>,
    // Released in `on_close` so the endpoint and the session do not keep each other alive.
    endpoint: Mutex<Option<StreamEndpoint<Session>>>,
}

impl Session {
    fn new(peer: String, config: &Config) -> Self {
        Self {
            peer,
            decoder: Mutex::new(RespDecoder::new(config.max_frame_size)),
            endpoint: Mutex::new(None),
        }
    }

    fn attach(&self, endpoint: StreamEndpoint<Session>) {
        *lock(&self.endpoint) = Some(endpoint);
    }

    fn endpoint(&self) -> Option<StreamEndpoint<Session>> {
        lock(&self.endpoint).clone()
    }

    fn reply(&self, endpoint: &StreamEndpoint<Session>, frame: Frame) {
        if let Err(err) = endpoint.write(frame.serialize()) {
            warn!(client = %self.peer, "Dropping reply: {}", err);
        }
    }
}

impl EventHandler for Session {
    fn on_close(&self) {
        info!(client = %self.peer, "Connection closed");
        lock(&self.endpoint).take();
    }

    fn on_exception(&self, err: &SocketError) {
        debug!(client = %self.peer, "Connection error: {}", err);
    }
}

impl StreamHandler for Session {
    fn on_read(&self, data: &[u8]) {
        let Some(endpoint) = self.endpoint() else {
            return;
        };

        let mut decoder = lock(&self.decoder);
        decoder.feed(data);

        loop {
            match decoder.decode() {
                Ok(frame) => {
                    debug!(client = %self.peer, "Received frame: {:?}", frame);
                    let res = execute(frame);
                    debug!(client = %self.peer, "Sending response: {:?}", res);
                    self.reply(&endpoint, res);
                }
                Err(err) if err.is_incomplete() => break,
                Err(err) => {
                    warn!(client = %self.peer, "Closing connection: {}", err);
                    drop(decoder);
                    endpoint.close();
                    return;
                }
            }
        }
    }
}

impl SessionHandler for Session {
    fn on_start(&self) {
        info!(client = %self.peer, "Accepted connection");
    }
}

fn execute(frame: Frame) -> Frame {
    let Frame::Array(parts) = frame else {
        return Frame::Error("ERR Protocol error: expected a command array".to_string());
    };

    let mut args = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            Frame::Bulk(bytes) => args.push(bytes),
            Frame::Simple(s) => args.push(Bytes::from(s)),
            _ => return Frame::Error("ERR Protocol error: invalid argument".to_string()),
        }
    }

    let Some((name, args)) = args.split_first() else {
        return Frame::Error("ERR empty command".to_string());
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();

    match (name.as_str(), args) {
        ("PING", []) => Frame::Simple("PONG".to_string()),
        ("PING", [message]) => Frame::Bulk(message.clone()),
        ("ECHO", [message]) => Frame::Bulk(message.clone()),
        ("PING" | "ECHO", _) => Frame::Error(format!(
            "ERR wrong number of arguments for '{}' command",
            name.to_ascii_lowercase()
        )),
        ("CLIENT", _) => Frame::Simple("OK".to_string()),
        _ => Frame::Error(format!("ERR unknown command '{}'", name)),
    }
}
