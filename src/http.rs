//! Minimal HTTP/1.1 plumbing shared by both listeners.

use anyhow::{anyhow, Result};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
}

pub fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    parse_request(&data)
}

pub fn parse_request(data: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(data);
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let target = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
    })
}

pub fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

/// Write a complete response and leave the connection to be closed.
pub fn write_response<W: Write>(
    out: &mut W,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> io::Result<()> {
    let mut head = format!(
        "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status_line(status),
        content_type,
        body.len()
    );
    for (name, value) in extra_headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    out.write_all(head.as_bytes())?;
    out.write_all(body)?;
    out.flush()
}

pub fn write_text_response<W: Write>(out: &mut W, status: u16, body: &str) -> io::Result<()> {
    write_response(out, status, "text/plain", &[], body.as_bytes())
}

/// Chunked transfer-encoding writer. The head of a chunked response has to
/// be written by the caller first.
pub struct ChunkedWriter<W: Write> {
    inner: W,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send one chunk. Empty input is skipped, since a zero-length chunk
    /// terminates the body.
    pub fn send_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        write!(self.inner, "{:X}\r\n", data.len())?;
        self.inner.write_all(data)?;
        self.inner.write_all(b"\r\n")?;
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_and_query_ignoring_headers() -> Result<()> {
        let req = parse_request(
            b"GET /control?var=car&val=1 HTTP/1.1\r\nHost: car.local\r\nX-Thing:  a b \r\n\r\n",
        )?;
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/control");
        assert_eq!(req.query.as_deref(), Some("var=car&val=1"));
        Ok(())
    }

    #[test]
    fn rejects_empty_request() {
        assert!(parse_request(b"").is_err());
        assert!(parse_request(b"GET\r\n\r\n").is_err());
    }

    #[test]
    fn response_carries_length_and_extra_headers() -> io::Result<()> {
        let mut out = Vec::new();
        write_response(
            &mut out,
            200,
            "text/html",
            &[("Access-Control-Allow-Origin", "*")],
            b"",
        )?;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        Ok(())
    }

    #[test]
    fn chunks_are_hex_framed() -> io::Result<()> {
        let mut writer = ChunkedWriter::new(Vec::new());
        writer.send_chunk(&[0xAB; 26])?;
        writer.send_chunk(&[])?;
        let out = writer.into_inner();
        assert!(out.starts_with(b"1A\r\n"));
        assert_eq!(out.len(), 4 + 26 + 2);
        assert!(out.ends_with(b"\r\n"));
        Ok(())
    }
}
