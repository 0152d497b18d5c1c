//! Full-duplex byte pump between two established streams.
//!
//! Each direction runs as its own task inside a `JoinSet` owned by
//! [`pump`]. The first direction to finish ends the session: the other task
//! is aborted and joined before `pump` returns, which drops every stream half
//! exactly once. Bytes still buffered in the aborted direction are not
//! drained.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;

use crate::{Error, Result};

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Copy direction relative to the `(a, b)` argument order of [`pump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// a -> b (client to backend on the entry node)
    Upstream,
    /// b -> a
    Downstream,
}

/// Live byte counters for one session.
#[derive(Debug, Default)]
pub struct Traffic {
    upstream: AtomicU64,
    downstream: AtomicU64,
}

impl Traffic {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upstream(&self) -> u64 {
        self.upstream.load(Ordering::Relaxed)
    }

    pub fn downstream(&self) -> u64 {
        self.downstream.load(Ordering::Relaxed)
    }

    pub fn add(&self, direction: Direction, n: u64) {
        match direction {
            Direction::Upstream => self.upstream.fetch_add(n, Ordering::Relaxed),
            Direction::Downstream => self.downstream.fetch_add(n, Ordering::Relaxed),
        };
    }
}

/// Copy `a <-> b` until either direction reaches EOF or fails.
///
/// Returns the direction that finished first on clean EOF, or that
/// direction's I/O error.
pub async fn pump<A, B>(a: A, b: B, traffic: Arc<Traffic>) -> Result<Direction>
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let mut tasks = JoinSet::new();
    tasks.spawn(copy_one_way(a_read, b_write, Direction::Upstream, traffic.clone()));
    tasks.spawn(copy_one_way(b_read, a_write, Direction::Downstream, traffic));

    let first = tasks.join_next().await;
    tasks.shutdown().await;

    match first {
        Some(Ok((direction, Ok(())))) => Ok(direction),
        Some(Ok((direction, Err(e)))) => {
            tracing::debug!(?direction, error = %e, "pump direction failed");
            Err(Error::Io(e))
        }
        Some(Err(join_err)) => Err(Error::Io(io::Error::new(io::ErrorKind::Other, join_err))),
        None => Err(Error::Io(io::Error::new(
            io::ErrorKind::Other,
            "pump has no running directions",
        ))),
    }
}

async fn copy_one_way<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    traffic: Arc<Traffic>,
) -> (Direction, io::Result<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = async {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                // Half-close; the peer may already be gone
                let _ = writer.shutdown().await;
                return Ok(());
            }
            writer.write_all(&buf[..n]).await?;
            writer.flush().await?;
            traffic.add(direction, n as u64);
        }
    }
    .await;
    (direction, result)
}
