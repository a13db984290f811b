//! Stub Basalt node used by the harness's own integration tests.
//!
//! Implements just enough of the master/worker/coordinator behavior to
//! exercise the orchestrator end to end with real OS processes:
//!
//! - **master** — serves the wire protocol on its service port and keeps
//!   an in-memory file table. `CREATE` is refused with `ERR NO_WORKERS`
//!   until at least one worker is registered, leaving a partial entry
//!   behind — the same worker-registration lag a real deployment shows
//!   right after startup. With election enabled it holds a session
//!   connection to the coordination ensemble for its whole lifetime.
//! - **worker** — waits `worker.register.delay.ms` (default 250), then
//!   registers with every master and re-registers on disconnect.
//! - **coordinator** — answers pings and holds session connections.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "basalt-noded", about = "Stub Basalt node for harness tests")]
struct Args {
    /// Path to the node.toml written by the harness.
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = basalt_cluster::NodeConfig::load(&args.config)
        .with_context(|| format!("loading node config from {}", args.config.display()))?;

    info!(
        role = %config.role,
        ordinal = config.ordinal,
        address = %config.service_address(),
        "basalt-noded starting"
    );
    match config.role {
        basalt_cluster::Role::Master => run_master(config).await,
        basalt_cluster::Role::Worker => run_worker(config).await,
        basalt_cluster::Role::Coordinator => run_coordinator(config).await,
    }
}

/// In-memory file table. `None` marks a partial entry left behind by a
/// create that failed with `NO_WORKERS`.
#[derive(Default)]
struct MasterState {
    files: HashMap<String, Option<Vec<u8>>>,
    workers: usize,
}

async fn run_master(config: basalt_cluster::NodeConfig) -> Result<()> {
    if config.election_enabled {
        if let Some(connect) = config.coordination.clone() {
            let ordinal = config.ordinal;
            tokio::spawn(hold_election_session(connect, ordinal));
        }
    }

    let service = TcpListener::bind((config.bind_address.as_str(), config.service_port))
        .await
        .context("binding master service port")?;
    let _aux = TcpListener::bind((config.bind_address.as_str(), config.aux_port))
        .await
        .context("binding master aux port")?;
    let state = Arc::new(Mutex::new(MasterState::default()));

    loop {
        let (stream, peer) = service.accept().await.context("accepting connection")?;
        debug!(peer = %peer, "master accepted connection");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(err) = serve_master_conn(stream, state).await {
                debug!(error = %err, "master connection ended with error");
            }
        });
    }
}

async fn serve_master_conn(
    stream: TcpStream,
    state: Arc<Mutex<MasterState>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut registered_worker = false;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let parts: Vec<&str> = line.trim_end().split(' ').collect();
        match parts.as_slice() {
            ["PING"] => write.write_all(b"PONG\n").await?,
            ["REGISTER", id] => {
                {
                    let mut state = state.lock().expect("master state poisoned");
                    state.workers += 1;
                    info!(worker = %id, workers = state.workers, "worker registered");
                }
                registered_worker = true;
                write.write_all(b"OK\n").await?;
            }
            ["CREATE", path, len, _block_size] => {
                handle_create(&mut reader, &mut write, &state, path, len).await?;
            }
            ["OPEN", path] => {
                let entry = {
                    let state = state.lock().expect("master state poisoned");
                    state.files.get(*path).cloned()
                };
                match entry {
                    Some(Some(data)) => {
                        write
                            .write_all(format!("LEN {}\n", data.len()).as_bytes())
                            .await?;
                        write.write_all(&data).await?;
                    }
                    Some(None) => write.write_all(b"LEN 0\n").await?,
                    None => write.write_all(b"ERR NOT_FOUND\n").await?,
                }
            }
            ["EXISTS", path] => {
                let exists = state
                    .lock()
                    .expect("master state poisoned")
                    .files
                    .contains_key(*path);
                write
                    .write_all(if exists { b"TRUE\n" } else { b"FALSE\n" })
                    .await?;
            }
            ["DELETE", path] => {
                let removed = state
                    .lock()
                    .expect("master state poisoned")
                    .files
                    .remove(*path)
                    .is_some();
                write
                    .write_all(if removed { b"OK\n" } else { b"ERR NOT_FOUND\n" })
                    .await?;
            }
            _ => write.write_all(b"ERR BAD_REQUEST\n").await?,
        }
        write.flush().await?;
    }

    if registered_worker {
        let mut state = state.lock().expect("master state poisoned");
        state.workers = state.workers.saturating_sub(1);
        info!(workers = state.workers, "worker disconnected");
    }
    Ok(())
}

async fn handle_create(
    reader: &mut BufReader<OwnedReadHalf>,
    write: &mut OwnedWriteHalf,
    state: &Mutex<MasterState>,
    path: &str,
    len: &str,
) -> std::io::Result<()> {
    let len: usize = len.parse().map_err(std::io::Error::other)?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    let reply: &[u8] = {
        let mut state = state.lock().expect("master state poisoned");
        if state.files.contains_key(path) {
            b"ERR EXISTS\n"
        } else if state.workers == 0 {
            // The entry is recorded before worker placement would happen,
            // so a failed create leaves a partial file behind — clients
            // must delete and retry, as with a real master.
            state.files.insert(path.to_string(), None);
            b"ERR NO_WORKERS\n"
        } else {
            state.files.insert(path.to_string(), Some(data));
            b"OK\n"
        }
    };
    write.write_all(reply).await
}

async fn run_worker(config: basalt_cluster::NodeConfig) -> Result<()> {
    let _service = TcpListener::bind((config.bind_address.as_str(), config.service_port))
        .await
        .context("binding worker service port")?;
    let _aux = TcpListener::bind((config.bind_address.as_str(), config.aux_port))
        .await
        .context("binding worker aux port")?;

    let delay_ms: u64 = config
        .property_or("worker.register.delay.ms", "250")
        .parse()
        .unwrap_or(250);
    debug!(delay_ms, "delaying worker registration");
    sleep(Duration::from_millis(delay_ms)).await;

    for master in config.masters.clone() {
        let ordinal = config.ordinal;
        tokio::spawn(register_loop(master, ordinal));
    }

    std::future::pending::<()>().await;
    unreachable!("worker runs until killed");
}

/// Keeps one registration with `master` alive, reconnecting on disconnect.
async fn register_loop(master: String, ordinal: usize) {
    loop {
        match TcpStream::connect(&master).await {
            Ok(mut stream) => {
                let hello = format!("REGISTER worker-{ordinal}\n");
                if stream.write_all(hello.as_bytes()).await.is_ok() {
                    info!(master = %master, "registered with master");
                    // The registration lives as long as this connection;
                    // block until the master goes away.
                    let mut sink = [0u8; 64];
                    loop {
                        match stream.read(&mut sink).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                    warn!(master = %master, "lost master connection, re-registering");
                }
            }
            Err(err) => {
                debug!(master = %master, error = %err, "master not reachable yet");
            }
        }
        sleep(Duration::from_millis(500)).await;
    }
}

async fn run_coordinator(config: basalt_cluster::NodeConfig) -> Result<()> {
    let service = TcpListener::bind((config.bind_address.as_str(), config.service_port))
        .await
        .context("binding coordinator service port")?;
    let _aux = TcpListener::bind((config.bind_address.as_str(), config.aux_port))
        .await
        .context("binding coordinator peer port")?;

    loop {
        let (stream, peer) = service.accept().await.context("accepting connection")?;
        debug!(peer = %peer, "coordinator accepted connection");
        tokio::spawn(async move {
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let reply: &[u8] = if line.trim_end() == "PING" {
                            b"PONG\n"
                        } else {
                            // Session establishment and anything else the
                            // master sends: acknowledge and keep the
                            // connection (the session) open.
                            b"OK\n"
                        };
                        if write.write_all(reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

/// Holds a session with one ensemble member for the master's lifetime,
/// re-establishing it if the member connection drops.
async fn hold_election_session(connection_string: String, ordinal: usize) {
    let members: Vec<String> = connection_string.split(',').map(str::to_string).collect();
    loop {
        for member in &members {
            let Ok(mut stream) = TcpStream::connect(member).await else {
                continue;
            };
            let hello = format!("SESSION master-{ordinal}\n");
            if stream.write_all(hello.as_bytes()).await.is_err() {
                continue;
            }
            info!(member = %member, "election session established");
            let mut sink = [0u8; 64];
            loop {
                match stream.read(&mut sink).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            warn!(member = %member, "election session lost");
        }
        sleep(Duration::from_millis(500)).await;
    }
}
