//! Switchyard demo server.
//!
//! Serves a greeting on `/test`, a broadcasting WebSocket echo on `/ws`, a
//! JSON summary of live sessions on `/sessions` and, optionally, a directory
//! of static files under everything else.
//!
//! ```text
//! switchyard --port 8888 --static-dir ./www
//! websocat ws://localhost:8888/ws
//! ```

use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use switchyard::config::{load_config, ServerConfig};
use switchyard::lifecycle::shutdown_signal;
use switchyard::observability::{init_logging, init_metrics};
use switchyard::{Method, Request, SessionHandle, WebServer, WsHandler};

/// Port used when neither the command line nor the config names a listener.
const DEFAULT_PORT: u16 = 8888;

#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(about = "Embeddable HTTP and WebSocket server demo", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen on this port instead of the configured listeners
    #[arg(short, long)]
    port: Option<u16>,

    /// Worker threads (overrides the configuration)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Serve this directory under `/`, after every other route
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("logging already initialized: {e}");
    }
    tracing::info!("switchyard v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let workers = config.workers;
    let mut server = WebServer::with_config(config);
    let handle = server.handle();

    server
        .add_http_handler(Method::GET, "/test/?", |_req| async { "Hello\n" })?
        .add_http_handler(Method::POST, "/test/?", |req: Request| async move {
            tracing::info!(body = %String::from_utf8_lossy(req.body()), "Received POST");
            "ok\n"
        })?;

    let sessions = handle.clone();
    server.add_http_handler(Method::GET, "/sessions", move |_req| {
        let sessions = sessions.sessions();
        async move {
            let list: Vec<_> = sessions
                .iter()
                .map(|s| {
                    json!({
                        "id": s.id().to_string(),
                        "peer": s.peer_addr().map(|a| a.to_string()),
                        "state": format!("{:?}", s.state()),
                    })
                })
                .collect();
            json!({ "count": list.len(), "sessions": list })
        }
    })?;

    let broadcast = handle.clone();
    server.add_ws_handler(
        "/ws(/.*)?",
        WsHandler::new(move |msg: String, session: SessionHandle| {
            let broadcast = broadcast.clone();
            async move {
                tracing::info!(session_id = %session.id(), message = %msg, "WebSocket message");
                let delivered = broadcast.broadcast(&msg);
                tracing::debug!(delivered, "Broadcast");
            }
        })
        .on_close(|session| tracing::info!(session_id = %session.id(), "WebSocket session closed")),
    )?;

    server.serve_configured_files()?;
    if let Some(dir) = cli.static_dir {
        server.serve_files("/", dir)?;
    }

    match cli.port {
        Some(port) => {
            server.listen(port)?;
        }
        None if server.config().listeners.is_empty() => {
            server.listen(DEFAULT_PORT)?;
        }
        None => {
            server.bind_configured_listeners()?;
        }
    }
    for addr in server.local_addrs() {
        tracing::info!(address = %addr, "Listening for connections");
    }

    server.start(workers)?;
    server.run_until(shutdown_signal())?;

    tracing::info!("Shutdown complete");
    Ok(())
}
