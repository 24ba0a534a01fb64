use std::collections::HashMap;
use std::io;

use super::{HeaderPoll, HttpClient, HttpError};

/// Canned response for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeEndpoint {
    pub status: u16,
    pub body: Vec<u8>,
    /// Declared content length; defaults to the body length.
    pub content_length: Option<i64>,
}

impl FakeEndpoint {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_length: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            content_length: None,
        }
    }

    fn declared_len(&self) -> i64 {
        self.content_length
            .unwrap_or_else(|| i64::try_from(self.body.len()).unwrap_or(i64::MAX))
    }
}

struct OpenResponse {
    endpoint: FakeEndpoint,
    pos: usize,
    pending_polls: u32,
}

/// Scripted HTTP client used in tests. URLs are matched without their query
/// string; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeHttpClient {
    endpoints: HashMap<String, FakeEndpoint>,
    url: Option<String>,
    current: Option<OpenResponse>,
    failed_opens: u32,
    header_delay: u32,
    read_chunk: Option<usize>,
    read_failure_after: Option<usize>,
    opened: Vec<String>,
    closes: usize,
}

impl FakeHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, url: &str, endpoint: FakeEndpoint) -> Self {
        self.endpoints.insert(url.to_string(), endpoint);
        self
    }

    /// Fail the next `count` opens with a refused connection.
    pub fn with_failed_opens(mut self, count: u32) -> Self {
        self.failed_opens = count;
        self
    }

    /// Answer "try again" this many times before headers are ready.
    pub fn with_header_delay(mut self, polls: u32) -> Self {
        self.header_delay = polls;
        self
    }

    /// Return at most `chunk` bytes per read.
    pub fn with_read_chunk(mut self, chunk: usize) -> Self {
        self.read_chunk = Some(chunk.max(1));
        self
    }

    /// Fail body reads once `bytes` have been delivered.
    pub fn with_read_failure_after(mut self, bytes: usize) -> Self {
        self.read_failure_after = Some(bytes);
        self
    }

    pub fn set_endpoint(&mut self, url: &str, endpoint: FakeEndpoint) {
        self.endpoints.insert(url.to_string(), endpoint);
    }

    pub fn remove_endpoint(&mut self, url: &str) {
        self.endpoints.remove(url);
    }

    /// Every URL passed to a successful or failed `open`, in order.
    pub fn opened(&self) -> &[String] {
        &self.opened
    }

    pub fn close_count(&self) -> usize {
        self.closes
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }
}

impl HttpClient for FakeHttpClient {
    fn set_url(&mut self, url: &str) -> Result<(), HttpError> {
        if url.is_empty() {
            return Err(HttpError::InvalidUrl(url.to_string()));
        }
        self.url = Some(url.to_string());
        Ok(())
    }

    fn open(&mut self, _write_len: usize) -> Result<(), HttpError> {
        let url = self.url.clone().ok_or(HttpError::NotOpen)?;
        self.opened.push(url.clone());
        if self.failed_opens > 0 {
            self.failed_opens -= 1;
            return Err(HttpError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted open failure",
            )));
        }
        let path = url.split('?').next().unwrap_or(&url);
        let endpoint = self
            .endpoints
            .get(path)
            .cloned()
            .unwrap_or_else(|| FakeEndpoint::status(404));
        self.current = Some(OpenResponse {
            endpoint,
            pos: 0,
            pending_polls: self.header_delay,
        });
        Ok(())
    }

    fn fetch_headers(&mut self) -> Result<HeaderPoll, HttpError> {
        let current = self.current.as_mut().ok_or(HttpError::NotOpen)?;
        if current.pending_polls > 0 {
            current.pending_polls -= 1;
            return Ok(HeaderPoll::TryAgain);
        }
        Ok(HeaderPoll::Ready(current.endpoint.declared_len()))
    }

    fn status_code(&self) -> u16 {
        self.current
            .as_ref()
            .map(|current| current.endpoint.status)
            .unwrap_or(0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        let current = self.current.as_mut().ok_or(HttpError::NotOpen)?;
        let delivered = i64::try_from(current.pos).unwrap_or(i64::MAX);
        if !buf.is_empty()
            && current.pos == current.endpoint.body.len()
            && current.endpoint.declared_len() > delivered
        {
            return Err(HttpError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "body shorter than declared length",
            )));
        }
        let mut limit = buf.len().min(current.endpoint.body.len() - current.pos);
        if let Some(chunk) = self.read_chunk {
            limit = limit.min(chunk);
        }
        if let Some(fail_at) = self.read_failure_after {
            if current.pos >= fail_at {
                return Err(HttpError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "scripted read failure",
                )));
            }
            limit = limit.min(fail_at - current.pos);
        }
        let start = current.pos;
        buf[..limit].copy_from_slice(&current.endpoint.body[start..start + limit]);
        current.pos += limit;
        Ok(limit)
    }

    fn close(&mut self) {
        self.current = None;
        self.closes += 1;
    }
}
