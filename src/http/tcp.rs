use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{HeaderPoll, HttpClient, HttpError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    path: String,
}

fn parse_url(url: &str) -> Result<Target, HttpError> {
    let invalid = || HttpError::InvalidUrl(url.to_string());
    let rest = url.strip_prefix("http://").ok_or_else(invalid)?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
        None => (authority, 80),
    };
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(Target {
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

/// Read one header line of at most `budget` bytes, newline included.
fn read_header_line<R: BufRead>(reader: &mut R, budget: usize) -> Result<String, HttpError> {
    if budget == 0 {
        return Err(HttpError::Protocol("response headers too large".into()));
    }
    let mut raw = Vec::new();
    let limit = u64::try_from(budget).unwrap_or(u64::MAX);
    let n = reader.by_ref().take(limit).read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Err(HttpError::Protocol("connection closed in headers".into()));
    }
    if raw.last() != Some(&b'\n') {
        if n >= budget {
            return Err(HttpError::Protocol("response headers too large".into()));
        }
        return Err(HttpError::Protocol("connection closed in headers".into()));
    }
    String::from_utf8(raw).map_err(|_| HttpError::Protocol("header is not utf-8".into()))
}

/// Minimal blocking HTTP/1.1 GET client over a plain TCP stream.
///
/// Only `http://` URLs and `Content-Length` framed bodies are supported.
pub struct TcpHttpClient {
    timeout: Duration,
    target: Option<Target>,
    reader: Option<BufReader<TcpStream>>,
    status: u16,
    remaining: u64,
}

impl TcpHttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            target: None,
            reader: None,
            status: 0,
            remaining: 0,
        }
    }

    fn connect(&self, target: &Target) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (target.host.as_str(), target.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        }))
    }
}

impl Default for TcpHttpClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpClient for TcpHttpClient {
    fn set_url(&mut self, url: &str) -> Result<(), HttpError> {
        self.target = Some(parse_url(url)?);
        Ok(())
    }

    fn open(&mut self, write_len: usize) -> Result<(), HttpError> {
        self.close();
        let target = self.target.clone().ok_or(HttpError::NotOpen)?;
        let mut stream = self.connect(&target)?;

        let mut request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: trafficflow/{}\r\nConnection: close\r\n",
            target.path,
            target.host,
            env!("CARGO_PKG_VERSION")
        );
        if write_len > 0 {
            request.push_str(&format!("Content-Length: {write_len}\r\n"));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes())?;
        stream.flush()?;

        self.reader = Some(BufReader::new(stream));
        Ok(())
    }

    fn fetch_headers(&mut self) -> Result<HeaderPoll, HttpError> {
        let reader = self.reader.as_mut().ok_or(HttpError::NotOpen)?;
        let status_line = read_header_line(reader, MAX_HEADER_BYTES)?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| {
                HttpError::Protocol(format!("bad status line '{}'", status_line.trim_end()))
            })?;

        let mut content_length: i64 = -1;
        let mut header_bytes = status_line.len();
        loop {
            let line = read_header_line(reader, MAX_HEADER_BYTES - header_bytes)?;
            header_bytes += line.len();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().map_err(|_| {
                    HttpError::Protocol(format!("bad content-length '{value}'"))
                })?;
            } else if name.eq_ignore_ascii_case("transfer-encoding")
                && !value.eq_ignore_ascii_case("identity")
            {
                return Err(HttpError::Protocol(format!(
                    "unsupported transfer-encoding '{value}'"
                )));
            }
        }

        self.status = status;
        self.remaining = u64::try_from(content_length).unwrap_or(0);
        Ok(HeaderPoll::Ready(content_length))
    }

    fn status_code(&self) -> u16 {
        self.status
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        let reader = self.reader.as_mut().ok_or(HttpError::NotOpen)?;
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let n = reader.read(&mut buf[..limit])?;
        if n == 0 {
            return Err(HttpError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed with {} body bytes missing", self.remaining),
            )));
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    fn close(&mut self) {
        self.reader = None;
        self.status = 0;
        self.remaining = 0;
    }
}
