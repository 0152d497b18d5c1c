//! OI-TLS Shared Library
//!
//! TLS record framing, ClientHello SNI sniffing, the duplex pump, and the
//! event plumbing used by both the entry node and the client.

pub mod client_hello;
pub mod cursor;
pub mod error;
pub mod events;
pub mod pump;
pub mod record;
pub mod tls;

pub use client_hello::{extract_sni, ClientHello};
pub use error::{Error, Result};
pub use events::{Event, EventSink, SessionId};
pub use pump::{pump, Direction, Traffic};
pub use record::{read_record, Record};
