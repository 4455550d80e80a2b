use redis::aio::MultiplexedConnection;
use redis::{RedisError, Value};
use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};

use netbase::server::run;
use netbase::Config;

const PORT: u16 = 6378;

async fn start_server() {
    tokio::spawn(run(PORT, Config::default()));
    sleep(Duration::from_millis(100)).await;
}

async fn connect() -> Result<MultiplexedConnection, RedisError> {
    start_server().await;

    let client = redis::Client::open(format!("redis://127.0.0.1:{}/", PORT))?;
    client.get_multiplexed_async_connection().await
}

#[tokio::test]
#[serial]
async fn test_ping() {
    let mut connection = connect().await.unwrap();

    let pong: String = redis::cmd("PING").query_async(&mut connection).await.unwrap();
    assert_eq!(pong, "PONG");

    let message: String = redis::cmd("PING")
        .arg("hello")
        .query_async(&mut connection)
        .await
        .unwrap();
    assert_eq!(message, "hello");
}

#[tokio::test]
#[serial]
async fn test_echo() {
    let mut connection = connect().await.unwrap();

    let echoed: String = redis::cmd("ECHO")
        .arg("Hello, World!")
        .query_async(&mut connection)
        .await
        .unwrap();
    assert_eq!(echoed, "Hello, World!");
}

#[tokio::test]
#[serial]
async fn test_pipeline() {
    let mut connection = connect().await.unwrap();

    let responses: (String, String, String) = redis::pipe()
        .cmd("PING")
        .cmd("ECHO")
        .arg("first")
        .cmd("ECHO")
        .arg("second")
        .query_async(&mut connection)
        .await
        .unwrap();

    assert_eq!(
        responses,
        ("PONG".to_string(), "first".to_string(), "second".to_string())
    );
}

#[tokio::test]
#[serial]
async fn test_unknown_command() {
    let mut connection = connect().await.unwrap();

    let response: Result<Value, RedisError> =
        redis::cmd("GET").arg("key").query_async(&mut connection).await;

    let err = response.unwrap_err();
    assert!(err.to_string().contains("unknown command 'GET'"), "{}", err);
}

#[tokio::test]
#[serial]
async fn test_fragmented_request() {
    start_server().await;
    let mut stream = TcpStream::connect(("127.0.0.1", PORT)).await.unwrap();

    stream.write_all(b"*1\r\n$4\r\nPI").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    stream.write_all(b"NG\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n").await.unwrap();

    let expected = b"+PONG\r\n$2\r\nhi\r\n";
    let mut response = vec![0u8; expected.len()];
    stream.read_exact(&mut response).await.unwrap();

    assert_eq!(response, expected);
}

#[tokio::test]
#[serial]
async fn test_malformed_request_closes_the_connection() {
    start_server().await;
    let mut stream = TcpStream::connect(("127.0.0.1", PORT)).await.unwrap();

    stream.write_all(b"*1\r\n$x\r\n").await.unwrap();

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await;

    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
}

#[tokio::test]
#[serial]
async fn test_oversized_bulk_length_closes_the_connection() {
    start_server().await;
    let mut stream = TcpStream::connect(("127.0.0.1", PORT)).await.unwrap();

    stream.write_all(b"*1\r\n$99999999999999\r\nx").await.unwrap();

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await;

    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
}
