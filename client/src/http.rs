//! Minimal HTTP/1.1 exchange carried over the InnerTLS stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use url::Url;

use oitls_shared::{Error, Result};

/// Status line plus headers
const MAX_HEAD: usize = 64 * 1024;

const MAX_BODY: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub host: String,
    /// Path and query
    pub target: String,
    pub user_agent: String,
}

impl HttpRequest {
    pub fn get(url: &Url, user_agent: &str) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("URL has no host: {}", url)))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        Ok(Self {
            host,
            target,
            user_agent: user_agent.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            self.target, self.host, self.user_agent
        )
        .into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header with this name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn malformed(what: impl Into<String>) -> Error {
    Error::MalformedResponse(what.into())
}

/// Read one response. The body is delimited by chunked encoding,
/// Content-Length, or the end of the stream, in that order of preference.
pub async fn read_response<R>(reader: R) -> Result<HttpResponse>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut head_len = 0usize;

    let status_line = read_head_line(&mut reader, &mut head_len).await?;
    let (status, reason) = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        let line = read_head_line(&mut reader, &mut head_len).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("header without colon: {:?}", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let mut response = HttpResponse {
        status,
        reason,
        headers,
        body: Vec::new(),
    };

    if (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(response);
    }

    let chunked = response
        .header("transfer-encoding")
        .map(|te| te.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    response.body = if chunked {
        read_chunked(&mut reader).await?
    } else if let Some(len) = response.header("content-length") {
        let len: usize = len
            .parse()
            .map_err(|_| malformed(format!("bad Content-Length {:?}", len)))?;
        if len > MAX_BODY {
            return Err(malformed("body too large"));
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await.map_err(|e| eof_as(e, "body truncated"))?;
        body
    } else {
        read_until_eof(&mut reader).await?
    };

    Ok(response)
}

/// One CRLF- or LF-terminated line without its terminator.
async fn read_head_line<R>(reader: &mut BufReader<R>, head_len: &mut usize) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take((MAX_HEAD - *head_len) as u64 + 1)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| eof_as(e, "headers truncated"))?;
    *head_len += n;
    if *head_len > MAX_HEAD {
        return Err(malformed("response head too large"));
    }
    if line.last() != Some(&b'\n') {
        return Err(malformed("headers truncated"));
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| malformed("non UTF-8 response head"))
}

fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(malformed(format!("bad status line {:?}", line)));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| malformed(format!("bad status code in {:?}", line)))?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok((status, reason))
}

async fn read_chunked<R>(reader: &mut BufReader<R>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader
            .read_line(&mut size_line)
            .await
            .map_err(|e| eof_as(e, "chunk size truncated"))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| malformed(format!("bad chunk size {:?}", size_hex)))?;

        if size == 0 {
            // Trailers; a peer that hangs up here has still sent the full body
            loop {
                let mut trailer = String::new();
                match reader.read_line(&mut trailer).await {
                    Ok(0) => break,
                    Ok(_) if trailer.trim().is_empty() => break,
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                    Err(e) => return Err(Error::Io(e)),
                }
            }
            return Ok(body);
        }

        let start = body.len();
        let end = start
            .checked_add(size)
            .filter(|end| *end <= MAX_BODY)
            .ok_or_else(|| malformed("body too large"))?;
        body.resize(end, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(|e| eof_as(e, "chunk truncated"))?;

        let mut crlf = String::new();
        reader
            .read_line(&mut crlf)
            .await
            .map_err(|e| eof_as(e, "chunk truncated"))?;
        if !crlf.trim().is_empty() {
            return Err(malformed("missing CRLF after chunk"));
        }
    }
}

/// A TLS peer that closes without close_notify surfaces as `UnexpectedEof`;
/// once the head is read that still ends the body.
async fn read_until_eof<R>(reader: &mut BufReader<R>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return Ok(body),
            Ok(n) if body.len() + n > MAX_BODY => return Err(malformed("body too large")),
            Ok(n) => body.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(body),
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

fn eof_as(e: std::io::Error, what: &str) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        malformed(what)
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &[u8]) -> Result<HttpResponse> {
        read_response(raw).await
    }

    #[test]
    fn test_request_format() {
        let url = Url::parse("https://backend.example.internal/healthz").unwrap();
        let req = HttpRequest::get(&url, "OI-TLS-Client/0.1").unwrap();
        assert_eq!(
            String::from_utf8(req.to_bytes()).unwrap(),
            "GET /healthz HTTP/1.1\r\nHost: backend.example.internal\r\nUser-Agent: OI-TLS-Client/0.1\r\nAccept: */*\r\nConnection: close\r\n\r\n"
        );

        let url = Url::parse("https://backend.example.internal:9443/a/b?x=1&y=2").unwrap();
        let req = HttpRequest::get(&url, "ua").unwrap();
        assert_eq!(req.host, "backend.example.internal:9443");
        assert_eq!(req.target, "/a/b?x=1&y=2");

        // Default port stays implicit
        let url = Url::parse("https://backend.example.internal:443").unwrap();
        let req = HttpRequest::get(&url, "ua").unwrap();
        assert_eq!(req.host, "backend.example.internal");
        assert_eq!(req.target, "/");
    }

    #[tokio::test]
    async fn test_content_length() {
        let resp = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nX-A: b\r\n\r\nokEXTRA")
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.header("x-a"), Some("b"));
        assert_eq!(resp.body, b"ok");
    }

    #[tokio::test]
    async fn test_chunked() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let resp = parse(raw).await.unwrap();
        assert_eq!(resp.body_text(), "Wikipedia");

        let resp = parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n")
            .await
            .unwrap();
        assert_eq!(resp.body, b"ok");
    }

    #[tokio::test]
    async fn test_body_until_eof() {
        let resp = parse(b"HTTP/1.0 503 Service Unavailable\n\nbackend down").await.unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(resp.reason, "Service Unavailable");
        assert_eq!(resp.body_text(), "backend down");
    }

    #[tokio::test]
    async fn test_no_body_statuses() {
        let resp = parse(b"HTTP/1.1 204 No Content\r\n\r\nignored").await.unwrap();
        assert!(resp.body.is_empty());
    }

    #[tokio::test]
    async fn test_malformed() {
        let cases: &[&[u8]] = &[
            b"",
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n",
            b"SSH-2.0-OpenSSH\r\n\r\n",
            b"HTTP/1.1 abc OK\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nno colon here\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort",
            b"HTTP/1.1 200 OK\r\nContent-Length: -1\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n",
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nab",
            b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nok",
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\nffffffffffffffff\r\nok\r\n0\r\n\r\n",
        ];
        for raw in cases {
            let err = parse(raw).await.unwrap_err();
            assert!(
                matches!(err, Error::MalformedResponse(_)),
                "{:?}: {}",
                String::from_utf8_lossy(raw),
                err
            );
        }
    }

    #[tokio::test]
    async fn test_body_size_limit() {
        let over = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", MAX_BODY + 1);
        let err = parse(over.as_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("body too large"), "{}", err);

        let mut raw = format!("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n", MAX_BODY)
            .into_bytes();
        raw.extend(std::iter::repeat(b'a').take(MAX_BODY));
        raw.extend_from_slice(b"\r\n1\r\nb\r\n0\r\n\r\n");
        let err = parse(&raw).await.unwrap_err();
        assert!(err.to_string().contains("body too large"), "{}", err);

        let mut raw = b"HTTP/1.1 200 OK\r\n\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_BODY + 1));
        let err = parse(&raw).await.unwrap_err();
        assert!(err.to_string().contains("body too large"), "{}", err);
    }

    #[tokio::test]
    async fn test_head_size_limit() {
        let mut raw = b"HTTP/1.1 200 OK\r\n".to_vec();
        for i in 0..2000 {
            raw.extend_from_slice(format!("X-Filler-{}: {}\r\n", i, "v".repeat(40)).as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        let err = parse(&raw).await.unwrap_err();
        assert!(err.to_string().contains("too large"), "{}", err);
    }
}
