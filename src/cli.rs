use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::bridge::http::BridgeState;
use crate::bridge::{self, RpcChannel};
use crate::core::mcp::ProtocolServer;
use crate::core::registry::Registry;
use crate::core::store::embeddings;
use crate::core::store::sqlite::SqliteStore;
use crate::core::tasks::TaskBoard;
use crate::logging;

const DEFAULT_BRIDGE_PORT: u16 = 7778;

fn print_help() {
    println!("agenthub {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: agenthub <command> [options]");
    println!();
    println!("Commands:");
    println!("  serve             Run the coordination hub over stdio (JSON-RPC frames)");
    println!("  bridge            Run the HTTP bridge in front of a hub server");
    println!("  help              Show this message");
    println!();
    println!("Options:");
    println!("  --db <path>           Database file (serve; default $HUB_DB_PATH)");
    println!("  --port <port>         Bridge listen port (default $PORT or {})", DEFAULT_BRIDGE_PORT);
    println!("  --server-path <bin>   Hub binary the bridge spawns (default $HUB_SERVER_PATH or self)");
}

pub(crate) async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("serve") => serve(&args[2..]).await,
        Some("bridge") => run_bridge(&args[2..]).await,
        Some("help") | Some("--help") | Some("-h") | None => {
            print_help();
            Ok(())
        }
        Some(other) => {
            print_help();
            anyhow::bail!("unknown command '{}'", other)
        }
    }
}

fn flag_value(args: &[String], name: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == name {
            return args.get(i + 1).cloned();
        }
        i += 1;
    }
    None
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("HUB_DB_PATH") {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agenthub")
        .join("hub.db")
}

async fn serve(args: &[String]) -> Result<()> {
    logging::init(true);

    let db_path = flag_value(args, "--db")
        .map(PathBuf::from)
        .unwrap_or_else(default_db_path);
    let embedder = embeddings::client_from_env();
    let store = Arc::new(
        SqliteStore::open(&db_path, embedder.dimension())
            .with_context(|| format!("opening database at {}", db_path.display()))?,
    );

    let tasks = Arc::new(TaskBoard::new(store.clone()));
    let registry = Arc::new(Registry::new(store.clone(), store, embedder));
    ProtocolServer::new(tasks, registry).serve_stdio().await
}

async fn run_bridge(args: &[String]) -> Result<()> {
    logging::init(false);

    let port = flag_value(args, "--port")
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_BRIDGE_PORT);
    let server_path = match flag_value(args, "--server-path")
        .or_else(|| std::env::var("HUB_SERVER_PATH").ok())
    {
        Some(path) => PathBuf::from(path),
        None => std::env::current_exe().context("resolving the hub binary to spawn")?,
    };

    let channel = RpcChannel::spawn(&server_path.to_string_lossy(), &["serve"])?;
    channel
        .initialize()
        .await
        .context("initialize handshake with the hub server failed")?;

    let result = bridge::http::serve(BridgeState { channel: channel.clone() }, port).await;
    channel.shutdown().await;
    result
}
