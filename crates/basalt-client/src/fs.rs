//! Filesystem client speaking the Basalt master wire protocol.
//!
//! The protocol is line-oriented over TCP. Every request opens a fresh
//! connection to the first reachable master, sends one command line, and
//! reads one response line (plus a raw payload for `OPEN`):
//!
//! ```text
//! PING                              -> PONG
//! CREATE <path> <len> <block_size>  -> OK | ERR EXISTS | ERR NO_WORKERS
//!   (followed by <len> raw bytes)
//! OPEN <path>                       -> LEN <n> + <n> raw bytes | ERR NOT_FOUND
//! EXISTS <path>                     -> TRUE | FALSE
//! DELETE <path>                     -> OK | ERR NOT_FOUND
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use crate::error::{ClientError, Result};

/// Per-address connect timeout. Kept short so a dead master in a
/// multi-master handle does not stall every request.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest `LEN` accepted from an `OPEN` response. A corrupt or hostile
/// length must surface as a protocol error, not an allocation.
const MAX_OPEN_LEN: u64 = 256 * 1024 * 1024;

/// Options for `create_file`.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Block size hint forwarded to the master.
    pub block_size_bytes: u64,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            block_size_bytes: 64 * 1024,
        }
    }
}

/// A fully buffered read handle for an opened file.
#[derive(Debug)]
pub struct FileReader {
    data: Vec<u8>,
    pos: usize,
}

impl FileReader {
    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        (self.data.len() - self.pos) as u64
    }

    /// Consumes the remaining bytes.
    pub fn read_to_end(&mut self) -> Vec<u8> {
        let rest = self.data.split_off(self.pos);
        self.pos = self.data.len();
        rest
    }
}

/// Client bound to the master addresses of one cluster.
///
/// The handle is only valid while the cluster that produced the addresses
/// is running; using it after teardown yields connect errors.
#[derive(Debug, Clone)]
pub struct FsClient {
    masters: Vec<SocketAddr>,
}

impl FsClient {
    /// Creates a client from the cluster's master addresses.
    pub fn new(masters: Vec<SocketAddr>) -> Self {
        Self { masters }
    }

    /// Master addresses this client will try, in order.
    pub fn masters(&self) -> &[SocketAddr] {
        &self.masters
    }

    /// Cheap readiness check: succeeds once any master answers `PING`.
    pub async fn ping(&self) -> Result<()> {
        let mut stream = self.connect_any().await?;
        stream.write_all(b"PING\n").await?;
        stream.flush().await?;
        let line = read_response_line(&mut stream).await?;
        if line == "PONG" {
            Ok(())
        } else {
            Err(ClientError::Protocol(format!(
                "expected PONG, got {line:?}"
            )))
        }
    }

    /// Creates a file holding `data`.
    ///
    /// Fails with [`ClientError::Unavailable`] while no worker has
    /// registered with the master; in that case a partial entry may be
    /// left behind and must be deleted before retrying.
    pub async fn create_file(&self, path: &str, data: &[u8], opts: &CreateOptions) -> Result<()> {
        validate_path(path)?;
        let mut stream = self.connect_any().await?;
        stream
            .write_all(
                format!("CREATE {path} {} {}\n", data.len(), opts.block_size_bytes).as_bytes(),
            )
            .await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        let line = read_response_line(&mut stream).await?;
        expect_ok(&line, path)
    }

    /// Opens a file for reading.
    pub async fn open_file(&self, path: &str) -> Result<FileReader> {
        validate_path(path)?;
        let mut stream = self.connect_any().await?;
        stream.write_all(format!("OPEN {path}\n").as_bytes()).await?;
        stream.flush().await?;
        let line = read_response_line(&mut stream).await?;
        match line.split_once(' ') {
            Some(("LEN", n)) => {
                let len: u64 = n
                    .parse()
                    .map_err(|_| ClientError::Protocol(format!("bad LEN response: {line:?}")))?;
                if len > MAX_OPEN_LEN {
                    return Err(ClientError::Protocol(format!(
                        "LEN {len} exceeds maximum of {MAX_OPEN_LEN} bytes"
                    )));
                }
                let mut data = vec![0u8; len as usize];
                stream.read_exact(&mut data).await?;
                Ok(FileReader { data, pos: 0 })
            }
            _ => Err(parse_error(&line, path)),
        }
    }

    /// Whether `path` exists (including partial entries from failed creates).
    pub async fn exists(&self, path: &str) -> Result<bool> {
        validate_path(path)?;
        let mut stream = self.connect_any().await?;
        stream
            .write_all(format!("EXISTS {path}\n").as_bytes())
            .await?;
        stream.flush().await?;
        let line = read_response_line(&mut stream).await?;
        match line.as_str() {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => Err(parse_error(&line, path)),
        }
    }

    /// Deletes `path`.
    pub async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut stream = self.connect_any().await?;
        stream
            .write_all(format!("DELETE {path}\n").as_bytes())
            .await?;
        stream.flush().await?;
        let line = read_response_line(&mut stream).await?;
        expect_ok(&line, path)
    }

    /// Connects to the first master that accepts within the per-address
    /// timeout.
    async fn connect_any(&self) -> Result<BufStream<TcpStream>> {
        let mut last: Option<ClientError> = None;
        for addr in &self.masters {
            match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok(BufStream::new(stream)),
                Ok(Err(source)) => {
                    last = Some(ClientError::Connect {
                        addr: *addr,
                        source,
                    });
                }
                Err(_elapsed) => {
                    tracing::debug!(addr = %addr, "connect timed out, trying next master");
                    last = Some(ClientError::NoMasterReachable {
                        tried: self.masters.len(),
                    });
                }
            }
        }
        Err(last.unwrap_or(ClientError::NoMasterReachable { tried: 0 }))
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.contains(char::is_whitespace) {
        return Err(ClientError::Protocol(format!(
            "path must be non-empty and whitespace-free: {path:?}"
        )));
    }
    Ok(())
}

async fn read_response_line(stream: &mut BufStream<TcpStream>) -> Result<String> {
    let mut line = String::new();
    let n = stream.read_line(&mut line).await?;
    if n == 0 {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before response",
        )));
    }
    Ok(line.trim_end().to_string())
}

fn expect_ok(line: &str, path: &str) -> Result<()> {
    if line == "OK" {
        Ok(())
    } else {
        Err(parse_error(line, path))
    }
}

/// Maps an `ERR <code> ...` response line onto the error taxonomy.
fn parse_error(line: &str, path: &str) -> ClientError {
    let code = line
        .strip_prefix("ERR ")
        .map(|rest| rest.split(' ').next().unwrap_or(rest));
    match code {
        Some("NO_WORKERS") => ClientError::Unavailable("no workers registered".into()),
        Some("EXISTS") => ClientError::AlreadyExists(path.to_string()),
        Some("NOT_FOUND") => ClientError::NotFound(path.to_string()),
        _ => ClientError::Protocol(format!("unexpected response: {line:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Spawns a one-shot server that answers each accepted connection with
    /// a canned script, enough to unit-test request/response mapping
    /// without a real cluster.
    async fn canned_master() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut reader = BufReader::new(read);
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let mut parts = line.trim_end().split(' ');
                    let reply: Vec<u8> = match parts.next() {
                        Some("PING") => b"PONG\n".to_vec(),
                        Some("CREATE") => {
                            let path = parts.next().unwrap_or("");
                            let len: usize = parts.next().unwrap_or("0").parse().unwrap();
                            let mut data = vec![0u8; len];
                            tokio::io::AsyncReadExt::read_exact(&mut reader, &mut data)
                                .await
                                .unwrap();
                            if path == "/taken" {
                                b"ERR EXISTS\n".to_vec()
                            } else if path == "/lagging" {
                                b"ERR NO_WORKERS\n".to_vec()
                            } else {
                                b"OK\n".to_vec()
                            }
                        }
                        Some("OPEN") => match parts.next() {
                            Some("/ten") => {
                                let mut r = b"LEN 10\n".to_vec();
                                r.extend_from_slice(&[7u8; 10]);
                                r
                            }
                            Some("/huge") => b"LEN 1099511627776\n".to_vec(),
                            _ => b"ERR NOT_FOUND\n".to_vec(),
                        },
                        Some("EXISTS") => match parts.next() {
                            Some("/ten") => b"TRUE\n".to_vec(),
                            _ => b"FALSE\n".to_vec(),
                        },
                        Some("DELETE") => b"OK\n".to_vec(),
                        _ => b"ERR BAD_REQUEST\n".to_vec(),
                    };
                    let _ = write.write_all(&reply).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn ping_and_open() {
        let addr = canned_master().await;
        let client = FsClient::new(vec![addr]);
        client.ping().await.unwrap();

        let mut reader = client.open_file("/ten").await.unwrap();
        assert_eq!(reader.remaining(), 10);
        assert_eq!(reader.read_to_end(), vec![7u8; 10]);
        assert_eq!(reader.remaining(), 0);
    }

    #[tokio::test]
    async fn create_maps_error_codes() {
        let addr = canned_master().await;
        let client = FsClient::new(vec![addr]);
        let opts = CreateOptions::default();

        client.create_file("/fresh", b"12345", &opts).await.unwrap();

        let err = client
            .create_file("/taken", b"12345", &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists(_)));
        assert!(!err.is_transient());

        let err = client
            .create_file("/lagging", b"12345", &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn exists_and_missing_open() {
        let addr = canned_master().await;
        let client = FsClient::new(vec![addr]);

        assert!(client.exists("/ten").await.unwrap());
        assert!(!client.exists("/nope").await.unwrap());

        let err = client.open_file("/nope").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejects_oversized_len_response() {
        let addr = canned_master().await;
        let client = FsClient::new(vec![addr]);

        let err = client.open_file("/huge").await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn skips_dead_master() {
        // First address refuses connections, second is live.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);
        let live = canned_master().await;

        let client = FsClient::new(vec![dead_addr, live]);
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn no_reachable_master_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = FsClient::new(vec![addr]);
        let err = client.ping().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn rejects_bad_paths() {
        let client = FsClient::new(vec![]);
        assert!(client.exists("").await.is_err());
        assert!(client.exists("/a b").await.is_err());
    }
}
