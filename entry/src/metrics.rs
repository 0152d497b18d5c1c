//! Metrics Collection for the Entry Node
//!
//! Counts session events and renders them in the Prometheus text format on
//! the optional admin listener.

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use oitls_shared::events::{Event, EventSink, SessionId, Stage};

/// Distinct SNI labels tracked before folding the rest into `other`
const MAX_SNI_LABELS: usize = 256;

const DURATION_WINDOW: usize = 4096;

/// Entry-wide metrics
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    sessions_accepted: AtomicU64,
    sessions_active: AtomicU64,
    sessions_closed: AtomicU64,
    /// Failures by stage
    outer_handshake_failures: AtomicU64,
    first_record_failures: AtomicU64,
    backend_dial_failures: AtomicU64,
    replay_failures: AtomicU64,
    pump_errors: AtomicU64,
    sni_extracted: AtomicU64,
    sni_unavailable: AtomicU64,
    bytes_client_to_backend: AtomicU64,
    bytes_backend_to_client: AtomicU64,
    durations: Mutex<DurationWindow>,
    sessions_by_sni: Mutex<HashMap<String, u64>>,
}

/// Most recent session durations, oldest evicted first
#[derive(Default)]
struct DurationWindow {
    values: VecDeque<u64>,
}

impl DurationWindow {
    fn record(&mut self, duration_ms: u64) {
        if self.values.len() == DURATION_WINDOW {
            self.values.pop_front();
        }
        self.values.push_back(duration_ms);
    }

    fn percentiles(&self, ps: &[f64]) -> Vec<u64> {
        if self.values.is_empty() {
            return vec![0; ps.len()];
        }
        let mut sorted: Vec<u64> = self.values.iter().copied().collect();
        sorted.sort_unstable();
        let n = sorted.len();
        ps.iter()
            .map(|p| sorted[((n as f64 * p / 100.0) as usize).min(n - 1)])
            .collect()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn active_sessions(&self) -> u64 {
        self.inner.sessions_active.load(Ordering::Relaxed)
    }

    fn stage_counter(&self, stage: Stage) -> &AtomicU64 {
        match stage {
            Stage::OuterHandshake => &self.inner.outer_handshake_failures,
            Stage::FirstRecord => &self.inner.first_record_failures,
            Stage::BackendDial => &self.inner.backend_dial_failures,
            Stage::Replay => &self.inner.replay_failures,
            Stage::Pump => &self.inner.pump_errors,
        }
    }

    fn count_sni(&self, hostname: &str) {
        let mut by_sni = self.inner.sessions_by_sni.lock().unwrap_or_else(|p| p.into_inner());
        let key = if by_sni.contains_key(hostname) || by_sni.len() < MAX_SNI_LABELS {
            hostname
        } else {
            "other"
        };
        *by_sni.entry(key.to_string()).or_default() += 1;
    }

    /// Generate Prometheus-format metrics text
    pub fn to_prometheus(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let i = &self.inner;

        let quantiles = i
            .durations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .percentiles(&[50.0, 95.0, 99.0]);

        let mut out = String::new();
        let _ = write!(
            out,
            r#"# HELP oitls_sessions_accepted_total OuterTLS connections accepted
# TYPE oitls_sessions_accepted_total counter
oitls_sessions_accepted_total {}

# HELP oitls_sessions_active Sessions currently open
# TYPE oitls_sessions_active gauge
oitls_sessions_active {}

# HELP oitls_sessions_closed_total Sessions ended for any reason
# TYPE oitls_sessions_closed_total counter
oitls_sessions_closed_total {}

# HELP oitls_session_failures_total Sessions ended by an error, by stage
# TYPE oitls_session_failures_total counter
oitls_session_failures_total{{stage="outer_handshake"}} {}
oitls_session_failures_total{{stage="first_record"}} {}
oitls_session_failures_total{{stage="backend_dial"}} {}
oitls_session_failures_total{{stage="replay"}} {}
oitls_session_failures_total{{stage="pump"}} {}

# HELP oitls_sni_total InnerTLS ClientHello SNI sniffing results
# TYPE oitls_sni_total counter
oitls_sni_total{{result="extracted"}} {}
oitls_sni_total{{result="unavailable"}} {}

# HELP oitls_bytes_total Bytes forwarded
# TYPE oitls_bytes_total counter
oitls_bytes_total{{direction="client_to_backend"}} {}
oitls_bytes_total{{direction="backend_to_client"}} {}

# HELP oitls_session_duration_ms Session duration in milliseconds
# TYPE oitls_session_duration_ms summary
oitls_session_duration_ms{{quantile="0.5"}} {}
oitls_session_duration_ms{{quantile="0.95"}} {}
oitls_session_duration_ms{{quantile="0.99"}} {}
"#,
            load(&i.sessions_accepted),
            load(&i.sessions_active),
            load(&i.sessions_closed),
            load(&i.outer_handshake_failures),
            load(&i.first_record_failures),
            load(&i.backend_dial_failures),
            load(&i.replay_failures),
            load(&i.pump_errors),
            load(&i.sni_extracted),
            load(&i.sni_unavailable),
            load(&i.bytes_client_to_backend),
            load(&i.bytes_backend_to_client),
            quantiles[0],
            quantiles[1],
            quantiles[2],
        );

        let by_sni = i.sessions_by_sni.lock().unwrap_or_else(|p| p.into_inner());
        if !by_sni.is_empty() {
            out.push_str("\n# HELP oitls_sessions_by_sni_total Sessions per sniffed InnerTLS SNI\n");
            out.push_str("# TYPE oitls_sessions_by_sni_total counter\n");
            let mut names: Vec<_> = by_sni.iter().collect();
            names.sort();
            for (sni, count) in names {
                let _ = writeln!(
                    out,
                    "oitls_sessions_by_sni_total{{sni=\"{}\"}} {}",
                    escape_label(sni),
                    count
                );
            }
        }
        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl EventSink for Metrics {
    fn emit(&self, _session: SessionId, event: &Event) {
        let i = &self.inner;
        match event {
            Event::Accepted { .. } => {
                i.sessions_accepted.fetch_add(1, Ordering::Relaxed);
                i.sessions_active.fetch_add(1, Ordering::Relaxed);
            }
            Event::Failed { stage, .. } => {
                self.stage_counter(*stage).fetch_add(1, Ordering::Relaxed);
            }
            Event::SniExtracted { hostname, .. } => {
                i.sni_extracted.fetch_add(1, Ordering::Relaxed);
                self.count_sni(hostname);
            }
            Event::SniUnavailable { .. } => {
                i.sni_unavailable.fetch_add(1, Ordering::Relaxed);
            }
            Event::Closed(summary) => {
                i.sessions_closed.fetch_add(1, Ordering::Relaxed);
                let _ = i
                    .sessions_active
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
                i.bytes_client_to_backend
                    .fetch_add(summary.bytes_client_to_backend, Ordering::Relaxed);
                i.bytes_backend_to_client
                    .fetch_add(summary.bytes_backend_to_client, Ordering::Relaxed);
                i.durations
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .record(summary.duration_ms);
            }
            _ => {}
        }
    }
}

/// Admin endpoints: `/metrics` and `/health`
pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.to_prometheus(),
    )
}
