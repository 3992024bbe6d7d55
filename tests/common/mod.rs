//! Shared utilities for integration tests.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use switchyard::WebServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Loopback address with an OS-chosen port.
pub fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Build a server, let `configure` register routes, bind a plain loopback
/// listener and start two workers.
#[allow(dead_code)]
pub fn start_server<F>(configure: F) -> (WebServer, SocketAddr)
where
    F: FnOnce(&mut WebServer),
{
    let mut server = WebServer::new();
    configure(&mut server);
    let addr = server.listen_on(loopback(), None).unwrap();
    server.start(2).unwrap();
    (server, addr)
}

/// Send raw request bytes and read until the server closes the connection.
#[allow(dead_code)]
pub async fn raw_exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server should close the connection")
        .unwrap();
    String::from_utf8(out).unwrap()
}

/// Poll `check` until it holds or five seconds pass.
#[allow(dead_code)]
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// Run `fut` with a five second ceiling.
#[allow(dead_code)]
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation timed out")
}
