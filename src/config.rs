use std::time::Duration;

/// Settings threaded into every endpoint and decoder at construction time.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of bytes requested from the socket per read.
    pub read_chunk_size: usize,
    /// Rolling deadline renewed after every successful read or write. `Duration::ZERO`
    /// disables it.
    pub idle_timeout: Duration,
    /// Upper bound on a client dial.
    pub connect_timeout: Duration,
    /// Number of payloads a stream endpoint may hold before writes start failing.
    pub write_queue_capacity: usize,
    /// Capacity of the buffered writer sitting in front of the stream handle.
    pub write_buffer_size: usize,
    /// Number of datagrams a UDP endpoint may hold before writes start failing.
    pub datagram_queue_capacity: usize,
    /// Largest RESP value, in bytes, a decoder will buffer.
    pub max_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            idle_timeout: Duration::from_secs(130),
            connect_timeout: Duration::from_secs(15),
            write_queue_capacity: 3000,
            write_buffer_size: 32 * 1024,
            datagram_queue_capacity: 1000,
            max_frame_size: 512 * 1024 * 1024,
        }
    }
}
