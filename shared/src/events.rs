//! Structured session events and the sinks that consume them.
//!
//! Components take an `Arc<dyn EventSink>` instead of logging through a
//! global, so tests can assert on exactly what a session reported.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::pump::Direction;

/// Per-process session counter value; the client uses 0.
pub type SessionId = u64;

/// Where in the entry session a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    OuterHandshake,
    FirstRecord,
    BackendDial,
    Replay,
    Pump,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    // Entry node
    Accepted { peer: SocketAddr },
    OuterHandshakeComplete,
    FirstRecord { content_type: u8, len: usize },
    SniExtracted { hostname: String, alpn: Vec<String> },
    SniUnavailable { reason: String },
    BackendDialed { backend: String },
    Failed { stage: Stage, error: String },
    Closed(SessionSummary),

    // Client
    OuterConnected { entry: String },
    InnerHandshakeComplete { server_name: String },
    RequestSent { bytes: usize },
    ResponseReceived { status: u16, body_len: usize },
}

/// Final accounting for one entry session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub peer: Option<SocketAddr>,
    pub sni: Option<String>,
    pub backend: String,
    pub bytes_client_to_backend: u64,
    pub bytes_backend_to_client: u64,
    pub duration_ms: u64,
    /// Set when the pump ended on a clean EOF.
    pub finished_first: Option<Direction>,
    /// Set when the session ended on an error.
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
}

impl SessionSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_stage.is_none()
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, session: SessionId, event: &Event);
}

/// Renders events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, session: SessionId, event: &Event) {
        match event {
            Event::Accepted { peer } => debug!(session, %peer, "accepted"),
            Event::OuterHandshakeComplete => debug!(session, "OuterTLS established"),
            Event::FirstRecord { content_type, len } => {
                debug!(session, content_type, len, "first inner record read")
            }
            Event::SniExtracted { hostname, alpn } => {
                info!(session, sni = %hostname, ?alpn, "InnerTLS SNI")
            }
            Event::SniUnavailable { reason } => {
                info!(session, reason = %reason, "InnerTLS SNI unavailable, forwarding anyway")
            }
            Event::BackendDialed { backend } => debug!(session, %backend, "backend connected"),
            Event::Failed { stage, error } => {
                warn!(session, ?stage, error = %error, "session failed")
            }
            Event::Closed(summary) => info!(
                session,
                sni = summary.sni.as_deref().unwrap_or("-"),
                up = summary.bytes_client_to_backend,
                down = summary.bytes_backend_to_client,
                duration_ms = summary.duration_ms,
                clean = summary.is_clean(),
                "session closed"
            ),
            Event::OuterConnected { entry } => info!(%entry, "OuterTLS established"),
            Event::InnerHandshakeComplete { server_name } => {
                info!(%server_name, "InnerTLS established")
            }
            Event::RequestSent { bytes } => debug!(bytes, "request written"),
            Event::ResponseReceived { status, body_len } => {
                info!(status, body_len, "response received")
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<(SessionId, Event)>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(SessionId, Event)> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn for_session(&self, session: SessionId) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|(id, _)| *id == session)
            .map(|(_, e)| e)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, session: SessionId, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((session, event.clone()));
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct Fanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Fanout {
    fn emit(&self, session: SessionId, event: &Event) {
        for sink in &self.sinks {
            sink.emit(session, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_filters_by_session() {
        let sink = MemorySink::new();
        sink.emit(1, &Event::OuterHandshakeComplete);
        sink.emit(2, &Event::SniUnavailable { reason: "x".into() });
        sink.emit(1, &Event::BackendDialed { backend: "b:1".into() });

        assert_eq!(sink.events().len(), 3);
        assert_eq!(
            sink.for_session(1),
            vec![
                Event::OuterHandshakeComplete,
                Event::BackendDialed { backend: "b:1".into() }
            ]
        );
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let fanout = Fanout::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(TracingSink));

        fanout.emit(7, &Event::RequestSent { bytes: 10 });
        assert_eq!(a.for_session(7).len(), 1);
        assert_eq!(b.for_session(7).len(), 1);
    }
}
