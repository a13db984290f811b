//! Readiness probing against a starting cluster.
//!
//! Readiness means *masters are reachable*, nothing more: worker
//! registration is asynchronous, so worker-dependent operations issued
//! right after readiness must use the client's bounded retry loop.

use std::time::{Duration, Instant};

use basalt_client::FsClient;

use crate::error::{ClusterError, Result};

/// Fixed pause between readiness probes.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// Polls the cluster through `client` until a master answers a ping or
/// `deadline` expires.
///
/// The probe does not distinguish *why* the cluster is not ready; every
/// failure mode surfaces as a single [`ClusterError::ClusterNotReady`].
pub async fn await_ready(client: &FsClient, deadline: Instant) -> Result<()> {
    let started = Instant::now();
    loop {
        match client.ping().await {
            Ok(()) => {
                tracing::info!(waited = ?started.elapsed(), "cluster ready");
                return Ok(());
            }
            Err(err) => {
                if Instant::now() + PROBE_INTERVAL >= deadline {
                    tracing::warn!(error = %err, "readiness deadline elapsed");
                    return Err(ClusterError::ClusterNotReady {
                        waited: started.elapsed(),
                    });
                }
                tracing::debug!(error = %err, "cluster not ready yet");
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn ready_once_a_master_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let (read, mut write) = stream.into_split();
                let mut line = String::new();
                let _ = BufReader::new(read).read_line(&mut line).await;
                let _ = write.write_all(b"PONG\n").await;
            }
        });

        let client = FsClient::new(vec![addr]);
        await_ready(&client, Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn times_out_against_unreachable_master() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = FsClient::new(vec![addr]);
        let started = Instant::now();
        let err = await_ready(&client, Instant::now() + Duration::from_millis(600))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::ClusterNotReady { .. }));
        // Bounded: fails at the deadline, not indefinitely.
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
