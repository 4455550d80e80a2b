pub mod acceptor;
pub mod client;
pub mod codec;
pub mod config;
mod deadline;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod handler;
mod lifecycle;
pub mod server;
pub mod stream;
pub mod tcp;
pub mod udp;
#[cfg(unix)]
pub mod unix;

pub use acceptor::{Acceptor, Listener};
pub use client::StreamClient;
pub use codec::RespCodec;
pub use config::Config;
pub use decoder::RespDecoder;
pub use error::SocketError;
pub use frame::Frame;
pub use handler::{
    AcceptHandler, ClientHandler, DatagramHandler, EventHandler, SessionHandler, StreamHandler,
};
pub use stream::StreamEndpoint;
pub use udp::UdpEndpoint;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
