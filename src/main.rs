use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use sockrpc::logging::{self, LogConfig};
use sockrpc::{Client, Server};

#[derive(Parser)]
#[command(name = "sockrpc")]
#[command(about = "JSON RPC over Unix domain sockets", long_about = None)]
struct Cli {
    /// Socket path the server binds or the client connects to.
    #[arg(long, default_value = "/tmp/sockrpc-demo.sock")]
    socket: PathBuf,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the key-value store demo server until stdin closes.
    Serve {
        /// Load and persist the store as JSON at this path.
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Call a method and print the response.
    Call {
        method: String,
        /// Parameters as a JSON document.
        params: Option<String>,
        /// Issue the call through the asynchronous path.
        #[arg(long = "async")]
        asynchronous: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(LogConfig {
        json: false,
        verbose: cli.verbose,
    });

    match cli.command {
        Commands::Serve { data } => run_serve(&cli.socket, data),
        Commands::Call {
            method,
            params,
            asynchronous,
        } => run_call(&cli.socket, &method, params, asynchronous),
    }
}

type Store = Arc<Mutex<BTreeMap<String, Value>>>;

fn run_serve(socket: &Path, data: Option<PathBuf>) -> Result<()> {
    let store: Store = Arc::new(Mutex::new(load_store(data.as_deref())?));
    let mut server = Server::new(socket).context("failed to create server")?;

    let kv = Arc::clone(&store);
    let file = data.clone();
    server.register("kv.set", move |params| {
        let (Some(key), Some(value)) = (
            params.get("key").and_then(Value::as_str),
            params.get("value"),
        ) else {
            return Some(json!({"error": "expected {key, value}"}));
        };
        kv.lock().unwrap().insert(key.to_owned(), value.clone());
        persist(&kv, file.as_deref());
        Some(json!("OK"))
    });

    let kv = Arc::clone(&store);
    server.register("kv.get", move |params| {
        let Some(key) = params.get("key").and_then(Value::as_str) else {
            return Some(json!({"error": "expected {key}"}));
        };
        match kv.lock().unwrap().get(key) {
            Some(value) => Some(value.clone()),
            None => Some(json!({"error": "no such key"})),
        }
    });

    let kv = Arc::clone(&store);
    let file = data.clone();
    server.register("kv.delete", move |params| {
        let Some(key) = params.get("key").and_then(Value::as_str) else {
            return Some(json!({"error": "expected {key}"}));
        };
        let removed = kv.lock().unwrap().remove(key).is_some();
        persist(&kv, file.as_deref());
        if removed {
            Some(json!("OK"))
        } else {
            Some(json!({"error": "no such key"}))
        }
    });

    let kv = Arc::clone(&store);
    server.register("kv.list", move |_params| {
        let keys: Vec<Value> = kv.lock().unwrap().keys().cloned().map(Value::from).collect();
        Some(Value::Array(keys))
    });

    server.register("echo", |params| Some(params));

    server.start().context("failed to start server")?;
    println!("serving on {}; close stdin to stop", socket.display());

    // Park until the controlling process hangs up.
    let mut sink = Vec::new();
    let _ = std::io::stdin().read_to_end(&mut sink);

    server.shutdown();
    Ok(())
}

fn load_store(path: Option<&Path>) -> Result<BTreeMap<String, Value>> {
    let Some(path) = path else {
        return Ok(BTreeMap::new());
    };
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn persist(store: &Store, path: Option<&Path>) {
    let Some(path) = path else { return };
    let content = match serde_json::to_string_pretty(&*store.lock().unwrap()) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize store");
            return;
        }
    };
    if let Err(e) = std::fs::write(path, content) {
        tracing::warn!(path = %path.display(), error = %e, "failed to persist store");
    }
}

fn run_call(socket: &Path, method: &str, params: Option<String>, asynchronous: bool) -> Result<()> {
    let params = params
        .map(|p| serde_json::from_str(&p))
        .transpose()
        .context("params must be a valid JSON document")?;

    let client = Client::connect(socket).context("failed to connect")?;
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("failed to set read timeout")?;

    let result = if asynchronous {
        let (tx, rx) = mpsc::channel();
        client.call_async(
            method,
            params,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        );
        rx.recv().context("async call never completed")?
    } else {
        client.call_sync(method, params)
    };

    match result {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("(no result)"),
    }
    Ok(())
}
