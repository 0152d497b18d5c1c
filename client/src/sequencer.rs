//! Double-TLS client sequence.
//!
//! OuterTLS to the entry node, then a second, independent TLS client
//! session to the backend carried inside it, then one HTTP request. Each
//! step fails with its own error variant; nothing is retried.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use oitls_shared::events::{Event, EventSink};
use oitls_shared::{tls, Error, Result};

use crate::http::{read_response, HttpRequest, HttpResponse};

pub struct Sequencer {
    entry: SocketAddr,
    outer_name: ServerName<'static>,
    backend_name: ServerName<'static>,
    backend_host: String,
    tls: Arc<ClientConfig>,
    events: Arc<dyn EventSink>,
}

impl Sequencer {
    /// `outer_name` is the SNI sent to the entry node; `backend_host` names
    /// the InnerTLS server.
    pub fn new(
        entry: SocketAddr,
        outer_name: &str,
        backend_host: &str,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Ok(Self {
            entry,
            outer_name: tls::server_name(outer_name)?,
            backend_name: tls::server_name(backend_host)?,
            backend_host: backend_host.to_string(),
            tls: tls::insecure_client_config(),
            events,
        })
    }

    pub async fn run(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let connector = TlsConnector::from(self.tls.clone());

        let tcp = TcpStream::connect(self.entry).await.map_err(Error::OuterDial)?;
        let _ = tcp.set_nodelay(true);
        let outer = connector
            .connect(self.outer_name.clone(), tcp)
            .await
            .map_err(Error::OuterDial)?;
        self.events.emit(
            0,
            &Event::OuterConnected {
                entry: self.entry.to_string(),
            },
        );

        // Fresh TLS state machine over the OuterTLS plaintext
        let mut inner = connector
            .connect(self.backend_name.clone(), outer)
            .await
            .map_err(Error::InnerHandshake)?;
        self.events.emit(
            0,
            &Event::InnerHandshakeComplete {
                server_name: self.backend_host.clone(),
            },
        );

        let bytes = request.to_bytes();
        inner.write_all(&bytes).await.map_err(Error::WriteRequest)?;
        inner.flush().await.map_err(Error::WriteRequest)?;
        self.events.emit(0, &Event::RequestSent { bytes: bytes.len() });

        let response = read_response(&mut inner)
            .await
            .map_err(|e| Error::ReadResponse(Box::new(e)))?;
        self.events.emit(
            0,
            &Event::ResponseReceived {
                status: response.status,
                body_len: response.body.len(),
            },
        );

        // close_notify on the inner session, then the outer one
        let _ = inner.shutdown().await;
        Ok(response)
    }
}
