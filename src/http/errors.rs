use std::fmt;
use std::io::ErrorKind;

use serde::Serialize;

use super::HttpError;
use crate::csv::CsvError;
use crate::Error;

/// High-level reason a refresh could not fetch fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailureKind {
    Config,
    Timeout,
    Refused,
    Disconnected,
    Status,
    EmptyBody,
    Malformed,
    Overflow,
    Chain,
    Store,
    Unknown,
}

impl FetchFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchFailureKind::Config => "config",
            FetchFailureKind::Timeout => "timeout",
            FetchFailureKind::Refused => "refused",
            FetchFailureKind::Disconnected => "disconnected",
            FetchFailureKind::Status => "status",
            FetchFailureKind::EmptyBody => "empty_body",
            FetchFailureKind::Malformed => "malformed",
            FetchFailureKind::Overflow => "overflow",
            FetchFailureKind::Chain => "chain",
            FetchFailureKind::Store => "store",
            FetchFailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FetchFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a crate-level error into a fetch failure reason.
pub fn classify_error(err: &Error) -> FetchFailureKind {
    match err {
        Error::InvalidArgs(_) => FetchFailureKind::Config,
        Error::Io(io_err) => classify_io_error(io_err),
        Error::Parse(_) | Error::ChecksumMismatch => FetchFailureKind::Malformed,
        Error::Http(http_err) => classify_http_error(http_err),
        Error::Ring(_) => FetchFailureKind::Overflow,
        Error::Csv(CsvError::Ring(_)) => FetchFailureKind::Overflow,
        Error::Csv(_) => FetchFailureKind::Malformed,
        Error::Chain(_) => FetchFailureKind::Chain,
        Error::Store(_) => FetchFailureKind::Store,
    }
}

pub fn classify_http_error(err: &HttpError) -> FetchFailureKind {
    match err {
        HttpError::InvalidUrl(_) => FetchFailureKind::Config,
        HttpError::Io(io_err) => classify_io_error(io_err),
        HttpError::NotOpen => FetchFailureKind::Unknown,
        HttpError::Protocol(_) => FetchFailureKind::Malformed,
        HttpError::Status(_) => FetchFailureKind::Status,
        HttpError::EmptyBody(_) => FetchFailureKind::EmptyBody,
        HttpError::HeaderTimeout => FetchFailureKind::Timeout,
    }
}

pub fn classify_io_error(err: &std::io::Error) -> FetchFailureKind {
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => FetchFailureKind::Timeout,
        ErrorKind::ConnectionRefused => FetchFailureKind::Refused,
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => FetchFailureKind::Disconnected,
        ErrorKind::InvalidInput => FetchFailureKind::Config,
        ErrorKind::InvalidData => FetchFailureKind::Malformed,
        _ => match err.raw_os_error() {
            // 110 = ETIMEDOUT, 111 = ECONNREFUSED, 101 = ENETUNREACH, 113 = EHOSTUNREACH
            Some(110) => FetchFailureKind::Timeout,
            Some(111) => FetchFailureKind::Refused,
            Some(101) | Some(113) => FetchFailureKind::Disconnected,
            _ => FetchFailureKind::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv::MalformedReason;
    use crate::ring::RingError;

    #[test]
    fn classify_io_kinds() {
        let refused = std::io::Error::new(ErrorKind::ConnectionRefused, "no");
        assert_eq!(classify_io_error(&refused), FetchFailureKind::Refused);
        let timeout = std::io::Error::new(ErrorKind::TimedOut, "slow");
        assert_eq!(classify_io_error(&timeout), FetchFailureKind::Timeout);
        let reset = std::io::Error::new(ErrorKind::ConnectionReset, "gone");
        assert_eq!(classify_io_error(&reset), FetchFailureKind::Disconnected);
    }

    #[test]
    fn classify_pipeline_errors() {
        assert_eq!(
            classify_error(&Error::Http(HttpError::Status(404))),
            FetchFailureKind::Status
        );
        assert_eq!(
            classify_error(&Error::Csv(CsvError::Malformed(
                MalformedReason::MissingComma
            ))),
            FetchFailureKind::Malformed
        );
        assert_eq!(
            classify_error(&Error::Csv(CsvError::Ring(RingError::ZeroCapacity))),
            FetchFailureKind::Overflow
        );
        assert_eq!(
            classify_error(&Error::Chain("loop".into())),
            FetchFailureKind::Chain
        );
    }

    #[test]
    fn kinds_serialize_as_snake_case() {
        let json = serde_json::to_string(&FetchFailureKind::EmptyBody).unwrap();
        assert_eq!(json, "\"empty_body\"");
        assert_eq!(FetchFailureKind::EmptyBody.to_string(), "empty_body");
    }
}
