use std::time::Duration;

use clap::Parser;
use netbase::{server, Config, Error};

const PORT: u16 = 6379;

#[derive(Parser, Debug)]
struct Args {
    /// The port to listen on
    #[arg(short, long, default_value_t = PORT, env = "NETBASE_PORT")]
    port: u16,

    /// Seconds a connection may stay idle before it is closed, 0 disables the deadline
    #[arg(long, default_value_t = 130, env = "NETBASE_IDLE_TIMEOUT")]
    idle_timeout: u64,

    /// Bytes requested from the socket per read
    #[arg(long, default_value_t = 1024, env = "NETBASE_READ_CHUNK_SIZE")]
    read_chunk_size: usize,

    /// Pending writes a connection may hold before replies are dropped
    #[arg(long, default_value_t = 3000, env = "NETBASE_WRITE_QUEUE_CAPACITY")]
    write_queue_capacity: usize,

    /// Largest request, in bytes, the server will buffer
    #[arg(long, default_value_t = 512 * 1024 * 1024, env = "NETBASE_MAX_FRAME_SIZE")]
    max_frame_size: usize,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let config = Config {
        idle_timeout: Duration::from_secs(args.idle_timeout),
        read_chunk_size: args.read_chunk_size,
        write_queue_capacity: args.write_queue_capacity,
        max_frame_size: args.max_frame_size,
        ..Config::default()
    };

    server::run(args.port, config).await
}
