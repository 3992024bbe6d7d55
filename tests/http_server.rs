//! End-to-end HTTP behavior over real sockets.

use std::time::Duration;

use switchyard::http::HttpError;
use switchyard::{Method, Request, StatusCode};

mod common;

fn hello_routes(server: &mut switchyard::WebServer) {
    server
        .add_http_handler(Method::GET, "/test/?", |_req| async { "Hello\n" })
        .unwrap()
        .add_http_handler(Method::POST, "/test/?", |req: Request| async move {
            format!("got {} bytes", req.body().len())
        })
        .unwrap();
}

#[tokio::test]
async fn serves_registered_routes() {
    let (_server, addr) = common::start_server(hello_routes);
    let client = reqwest::Client::new();

    for path in ["/test", "/test/", "/test?verbose=1"] {
        let res = client.get(format!("http://{addr}{path}")).send().await.unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK, "path {path}");
        assert_eq!(res.text().await.unwrap(), "Hello\n");
    }

    let res = client
        .post(format!("http://{addr}/test"))
        .body("12345")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "got 5 bytes");
}

#[tokio::test]
async fn unmatched_paths_are_404_with_target() {
    let (_server, addr) = common::start_server(hello_routes);

    let res = reqwest::get(format!("http://{addr}/test/x?y=2")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(
        res.headers()[reqwest::header::CONTENT_TYPE],
        "text/html"
    );
    assert_eq!(
        res.text().await.unwrap(),
        "The resource '/test/x?y=2' was not found."
    );
}

#[tokio::test]
async fn keep_alive_connection_serves_until_close() {
    let (_server, addr) = common::start_server(hello_routes);

    let out = common::raw_exchange(
        addr,
        "GET /test HTTP/1.1\r\nHost: x\r\n\r\nGET /test HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(out.contains("server: switchyard/"));
}

#[tokio::test]
async fn first_registered_route_wins() {
    let (_server, addr) = common::start_server(|server| {
        server
            .add_http_handler(Method::GET, "/items/special", |_req| async { "special" })
            .unwrap()
            .add_http_handler(Method::GET, "/items/.*", |_req| async { "generic" })
            .unwrap()
            .add_http_handler(Method::GET, "/items/never", |_req| async { "never" })
            .unwrap();
    });

    let body = |path: &'static str| async move {
        reqwest::get(format!("http://{addr}{path}"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    };
    assert_eq!(body("/items/special").await, "special");
    assert_eq!(body("/items/other").await, "generic");
    assert_eq!(body("/items/never").await, "generic");
}

#[tokio::test]
async fn handler_errors_become_responses() {
    let (_server, addr) = common::start_server(|server| {
        server
            .add_http_handler(Method::GET, "/teapot", |_req| async {
                Err::<String, _>(HttpError::new(StatusCode::IM_A_TEAPOT, "short and stout"))
            })
            .unwrap()
            .add_http_handler(Method::GET, "/io", |_req| async {
                Err::<String, _>(std::io::Error::other("backend unreachable"))
            })
            .unwrap()
            .add_http_handler(Method::GET, "/panic", |_req| async {
                if true {
                    panic!("handler bug");
                }
                "unreachable"
            })
            .unwrap();
    });

    let res = reqwest::get(format!("http://{addr}/teapot")).await.unwrap();
    assert_eq!(res.status().as_u16(), 418);
    assert_eq!(res.text().await.unwrap(), "short and stout");

    let res = reqwest::get(format!("http://{addr}/io")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.text().await.unwrap(), "backend unreachable");

    let res = reqwest::get(format!("http://{addr}/panic")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.text().await.unwrap(), "unhandled exception");

    // The server keeps serving after a panic.
    let res = reqwest::get(format!("http://{addr}/teapot")).await.unwrap();
    assert_eq!(res.status().as_u16(), 418);
}

#[tokio::test]
async fn static_files_are_served_below_prefix() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "from disk\n").unwrap();
    let root = dir.path().to_path_buf();

    let (_server, addr) = common::start_server(move |server| {
        server
            .add_http_handler(Method::GET, "/static/hello.txt", |_req| async { "from handler\n" })
            .unwrap()
            .add_http_handler(Method::GET, "/static/other.txt", |_req| async { "shadow\n" })
            .unwrap()
            .serve_files("/static/", root)
            .unwrap();
    });

    // Earlier routes shadow the mount.
    let res = reqwest::get(format!("http://{addr}/static/hello.txt")).await.unwrap();
    assert_eq!(res.text().await.unwrap(), "from handler\n");

    std::fs::write(dir.path().join("page.html"), "<p>hi</p>").unwrap();
    let res = reqwest::get(format!("http://{addr}/static/page.html")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    assert_eq!(res.headers()[reqwest::header::CONTENT_TYPE], "text/html");
    assert_eq!(res.text().await.unwrap(), "<p>hi</p>");

    let res = reqwest::get(format!("http://{addr}/static/missing.txt")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stop_ends_idle_connections_and_accepting() {
    let (server, addr) = common::start_server(hello_routes);
    let handle = server.handle();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    assert!(common::eventually(|| handle.active_connections() == 1).await);

    handle.stop();

    let mut buf = Vec::new();
    let n = common::within(tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf))
        .await
        .unwrap();
    assert_eq!(n, 0);
    assert!(common::eventually(|| handle.active_connections() == 0).await);

    // The accept loop is gone and its socket closed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[test]
fn run_serves_on_calling_thread_until_stopped() {
    let mut server = switchyard::WebServer::new();
    hello_routes(&mut server);
    let addr = server.listen_on(common::loopback(), None).unwrap();
    let handle = server.handle();

    let client = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let body = runtime.block_on(async {
            reqwest::get(format!("http://{addr}/test"))
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        });
        handle.stop();
        body
    });

    server.run().unwrap();
    assert_eq!(client.join().unwrap(), "Hello\n");
}
