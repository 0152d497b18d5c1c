//! SNI-sniffing session handler and accept loop.
//!
//! Per connection: OuterTLS accept, read the first InnerTLS record, note its
//! SNI, dial the backend, replay the record verbatim, then pump bytes until
//! either side finishes. The handler never decrypts the inner session.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use oitls_shared::events::{Event, EventSink, SessionId, SessionSummary, Stage};
use oitls_shared::{pump, read_record, ClientHello, Direction, Error, Record, Result, Traffic};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct SessionHandler {
    backend: String,
    acceptor: TlsAcceptor,
    handshake_timeout: Option<Duration>,
    events: Arc<dyn EventSink>,
    next_id: AtomicU64,
}

impl SessionHandler {
    pub fn new(
        backend: String,
        tls: Arc<ServerConfig>,
        handshake_timeout: Option<Duration>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            acceptor: TlsAcceptor::from(tls),
            handshake_timeout,
            events,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run one accepted TCP connection to completion.
    pub async fn handle(&self, tcp: TcpStream, peer: SocketAddr) -> SessionSummary {
        let id = self.next_session_id();
        let started = Instant::now();
        self.events.emit(id, &Event::Accepted { peer });

        let accepted = within(self.handshake_timeout, "OuterTLS handshake", async {
            self.acceptor.accept(tcp).await.map_err(Error::Io)
        })
        .await;

        match accepted {
            Ok(client) => {
                self.events.emit(id, &Event::OuterHandshakeComplete);
                self.forward(id, Some(peer), client, started).await
            }
            Err(e) => {
                let summary = self.empty_summary(Some(peer));
                self.close(id, summary, started, Err((Stage::OuterHandshake, e)))
            }
        }
    }

    /// Sniff, dial, replay and pump over an already-established client
    /// stream (the OuterTLS plaintext side). `started` is when the session
    /// was accepted.
    pub async fn forward<S>(
        &self,
        id: SessionId,
        peer: Option<SocketAddr>,
        client: S,
        started: Instant,
    ) -> SessionSummary
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let traffic = Traffic::new();
        let mut summary = self.empty_summary(peer);
        let outcome = self.sniff_and_forward(id, client, &traffic, &mut summary.sni).await;
        summary.bytes_client_to_backend = traffic.upstream();
        summary.bytes_backend_to_client = traffic.downstream();
        self.close(id, summary, started, outcome)
    }

    async fn sniff_and_forward<S>(
        &self,
        id: SessionId,
        mut client: S,
        traffic: &Arc<Traffic>,
        sni: &mut Option<String>,
    ) -> std::result::Result<Direction, (Stage, Error)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let record = within(self.handshake_timeout, "first record", read_record(&mut client))
            .await
            .map_err(|e| (Stage::FirstRecord, e))?;
        self.events.emit(
            id,
            &Event::FirstRecord {
                content_type: record.content_type(),
                len: record.wire_len(),
            },
        );

        *sni = self.sniff(id, &record);

        let mut backend = TcpStream::connect(&self.backend).await.map_err(|source| {
            let e = Error::Dial {
                addr: self.backend.clone(),
                source,
            };
            (Stage::BackendDial, e)
        })?;
        let _ = backend.set_nodelay(true);
        self.events.emit(
            id,
            &Event::BackendDialed {
                backend: self.backend.clone(),
            },
        );

        // The backend must see the ClientHello exactly once, as sent
        backend
            .write_all(record.as_bytes())
            .await
            .map_err(|e| (Stage::Replay, Error::Io(e)))?;
        traffic.add(Direction::Upstream, record.wire_len() as u64);

        pump(client, backend, traffic.clone())
            .await
            .map_err(|e| (Stage::Pump, e))
    }

    /// Best effort; the hostname is only reported, never used for routing.
    fn sniff(&self, id: SessionId, record: &Record) -> Option<String> {
        let sniffed = ClientHello::parse(record)
            .and_then(|hello| Ok((hello.server_name()?, hello.alpn_protocols())));
        match sniffed {
            Ok((hostname, alpn)) => {
                self.events.emit(
                    id,
                    &Event::SniExtracted {
                        hostname: hostname.clone(),
                        alpn,
                    },
                );
                Some(hostname)
            }
            Err(e) => {
                self.events.emit(id, &Event::SniUnavailable { reason: e.to_string() });
                None
            }
        }
    }

    fn empty_summary(&self, peer: Option<SocketAddr>) -> SessionSummary {
        SessionSummary {
            peer,
            sni: None,
            backend: self.backend.clone(),
            bytes_client_to_backend: 0,
            bytes_backend_to_client: 0,
            duration_ms: 0,
            finished_first: None,
            failed_stage: None,
            error: None,
        }
    }

    fn close(
        &self,
        id: SessionId,
        mut summary: SessionSummary,
        started: Instant,
        outcome: std::result::Result<Direction, (Stage, Error)>,
    ) -> SessionSummary {
        match outcome {
            Ok(direction) => summary.finished_first = Some(direction),
            Err((stage, e)) => {
                let error = e.to_string();
                self.events.emit(
                    id,
                    &Event::Failed {
                        stage,
                        error: error.clone(),
                    },
                );
                summary.failed_stage = Some(stage);
                summary.error = Some(error);
            }
        }
        summary.duration_ms = started.elapsed().as_millis() as u64;
        self.events.emit(id, &Event::Closed(summary.clone()));
        summary
    }
}

async fn within<T, F>(limit: Option<Duration>, what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(what))?,
        None => fut.await,
    }
}

/// Accept loop. Each connection runs in its own task; a failed session or a
/// failed accept never stops the loop. When `shutdown` resolves, accepting
/// stops and open sessions are aborted.
pub async fn serve<F>(listener: TcpListener, handler: Arc<SessionHandler>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut sessions = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(open = sessions.len(), "Shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer)) => {
                    let _ = tcp.set_nodelay(true);
                    let handler = handler.clone();
                    sessions.spawn(async move {
                        handler.handle(tcp, peer).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "Session task panicked");
                    }
                }
            }
        }
    }

    sessions.shutdown().await;
    debug!("All sessions closed");
}
