use std::fmt;
use std::io;

use crate::app::Logger;

pub mod errors;
pub mod fake;
pub mod tcp;

pub use fake::{FakeEndpoint, FakeHttpClient};
pub use tcp::TcpHttpClient;

/// Bound on "try again" answers while waiting for response headers.
pub const MAX_HEADER_POLLS: u32 = 64;
pub const HTTP_OK: u16 = 200;

/// Result of polling for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPoll {
    /// Headers arrived; carries the declared content length (`-1` if absent).
    Ready(i64),
    TryAgain,
}

#[derive(Debug)]
pub enum HttpError {
    InvalidUrl(String),
    Io(io::Error),
    NotOpen,
    Protocol(String),
    Status(u16),
    EmptyBody(i64),
    HeaderTimeout,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::InvalidUrl(url) => write!(f, "invalid url '{url}'"),
            HttpError::Io(err) => write!(f, "connection error: {err}"),
            HttpError::NotOpen => write!(f, "connection is not open"),
            HttpError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            HttpError::Status(code) => write!(f, "unexpected http status {code}"),
            HttpError::EmptyBody(len) => write!(f, "unusable content length {len}"),
            HttpError::HeaderTimeout => {
                write!(f, "headers not ready after {MAX_HEADER_POLLS} polls")
            }
        }
    }
}

impl std::error::Error for HttpError {}

impl From<io::Error> for HttpError {
    fn from(value: io::Error) -> Self {
        HttpError::Io(value)
    }
}

/// Blocking HTTP client surface the fetch pipeline drives.
pub trait HttpClient {
    fn set_url(&mut self, url: &str) -> Result<(), HttpError>;
    fn open(&mut self, write_len: usize) -> Result<(), HttpError>;
    fn fetch_headers(&mut self) -> Result<HeaderPoll, HttpError>;
    fn status_code(&self) -> u16;
    /// Read body bytes into `buf`; `Ok(0)` means the body has ended.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError>;
    fn close(&mut self);
}

/// Append the device identifier query the data server uses for accounting.
pub fn request_url(url: &str, device_id: Option<&str>) -> String {
    match device_id {
        Some(id) if !id.is_empty() => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}id={id}")
        }
        _ => url.to_string(),
    }
}

/// Open `url` and wait for a 200 response with a positive content length.
///
/// Up to `attempts` tries are made; every failed try closes the connection
/// before the next one.
pub fn open_server_file<C: HttpClient + ?Sized>(
    client: &mut C,
    url: &str,
    attempts: u32,
    logger: &Logger,
) -> Result<i64, HttpError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match try_open(client, url) {
            Ok(len) => return Ok(len),
            Err(err) => {
                client.close();
                if attempt >= attempts {
                    logger.warn(format!(
                        "open {url} failed after {attempt} attempt(s): {err}"
                    ));
                    return Err(err);
                }
                logger.debug(format!("open {url} attempt {attempt} failed: {err}"));
                attempt += 1;
            }
        }
    }
}

fn try_open<C: HttpClient + ?Sized>(client: &mut C, url: &str) -> Result<i64, HttpError> {
    client.set_url(url)?;
    client.open(0)?;

    let mut content_length = None;
    for _ in 0..MAX_HEADER_POLLS {
        if let HeaderPoll::Ready(len) = client.fetch_headers()? {
            content_length = Some(len);
            break;
        }
    }
    let content_length = content_length.ok_or(HttpError::HeaderTimeout)?;

    let status = client.status_code();
    if status != HTTP_OK {
        return Err(HttpError::Status(status));
    }
    if content_length <= 0 {
        return Err(HttpError::EmptyBody(content_length));
    }
    Ok(content_length)
}

/// One bounded chunk of a response body.
#[derive(Debug, PartialEq, Eq)]
pub struct Block<'a> {
    pub bytes: &'a [u8],
    /// The body ended inside this block; a closing newline was appended.
    pub is_final: bool,
}

/// Pulls fixed-size blocks from an open response.
pub struct ResponseBlockReader {
    buf: Vec<u8>,
}

impl ResponseBlockReader {
    /// `block_size` bounds every returned block, including the newline that
    /// may be appended to the final one.
    pub fn new(block_size: usize) -> Self {
        Self {
            buf: vec![0; block_size.max(2)],
        }
    }

    pub fn block_size(&self) -> usize {
        self.buf.len()
    }

    /// Read up to `block_size - 1` body bytes. A short read means the body
    /// is exhausted, so a newline is appended and the block is final.
    pub fn next_block<C: HttpClient + ?Sized>(
        &mut self,
        client: &mut C,
    ) -> Result<Block<'_>, HttpError> {
        let want = self.buf.len() - 1;
        let mut filled = 0;
        while filled < want {
            let n = client.read(&mut self.buf[filled..want])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let is_final = filled < want;
        if is_final {
            self.buf[filled] = b'\n';
            filled += 1;
        }
        Ok(Block {
            bytes: &self.buf[..filled],
            is_final,
        })
    }
}
