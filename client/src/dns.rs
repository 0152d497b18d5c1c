//! Single-shot UDP DNS queries: entry host A lookup and the diagnostic TXT
//! lookup.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dns_parser::{Builder, Packet, QueryClass, QueryType, RData, ResponseCode};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use oitls_shared::{Error, Result};

pub const TXT_NAME: &str = "_oitls.example.internal";

const MAX_RESPONSE: usize = 4096;

/// Resolve `host` to its first A record.
pub async fn resolve_host(host: &str, server: SocketAddr, limit: Duration) -> Result<Ipv4Addr> {
    debug!(%host, %server, "A lookup");
    let (id, response) = exchange(host, QueryType::A, server, limit).await?;
    let packet = parse_response(&response, id)?;
    packet
        .answers
        .iter()
        .find_map(|answer| match &answer.data {
            RData::A(dns_parser::rdata::a::Record(ip)) => Some(*ip),
            _ => None,
        })
        .ok_or_else(|| Error::Dns(format!("no A record for {}", host)))
}

/// Query the TXT records of [`TXT_NAME`]. An empty answer is not an error.
pub async fn lookup_txt(server: SocketAddr, limit: Duration) -> Result<Vec<String>> {
    debug!(%server, name = TXT_NAME, "TXT lookup");
    let (id, response) = exchange(TXT_NAME, QueryType::TXT, server, limit).await?;
    let packet = parse_response(&response, id)?;
    let mut texts = Vec::new();
    for answer in &packet.answers {
        if let RData::TXT(txt) = &answer.data {
            let text: Vec<u8> = txt.iter().flat_map(|chunk| chunk.iter().copied()).collect();
            texts.push(String::from_utf8_lossy(&text).into_owned());
        }
    }
    Ok(texts)
}

async fn exchange(
    name: &str,
    qtype: QueryType,
    server: SocketAddr,
    limit: Duration,
) -> Result<(u16, Vec<u8>)> {
    let id = query_id();
    let mut builder = Builder::new_query(id, true);
    builder.add_question(name, false, qtype, QueryClass::IN);
    let query = builder
        .build()
        .map_err(|_| Error::Dns(format!("query for {} does not fit in one packet", name)))?;

    let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(server).await?;
    socket.send(&query).await?;

    let mut buf = vec![0u8; MAX_RESPONSE];
    let n = timeout(limit, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::Dns(format!("no response from {} within {:?}", server, limit)))??;
    buf.truncate(n);
    Ok((id, buf))
}

fn parse_response(buf: &[u8], id: u16) -> Result<Packet<'_>> {
    let packet = Packet::parse(buf).map_err(|e| Error::Dns(format!("bad response: {}", e)))?;
    if packet.header.id != id {
        return Err(Error::Dns(format!(
            "response id {} does not match query id {}",
            packet.header.id, id
        )));
    }
    if !matches!(packet.header.response_code, ResponseCode::NoError) {
        return Err(Error::Dns(format!(
            "server answered {:?}",
            packet.header.response_code
        )));
    }
    Ok(packet)
}

fn query_id() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos ^ std::process::id()) as u16
}
