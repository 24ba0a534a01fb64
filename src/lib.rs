pub mod addendum;
pub mod app;
pub mod cli;
pub mod config;
pub mod csv;
pub mod error_state;
pub mod http;
pub mod indicator;
pub mod refresh;
pub mod ring;
pub mod store;
pub mod telemetry;
pub mod traffic;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    InvalidArgs(String),
    Io(std::io::Error),
    Parse(String),
    ChecksumMismatch,
    Http(http::HttpError),
    Ring(ring::RingError),
    Csv(csv::CsvError),
    /// The addendum chain itself was unusable (bad pointer, too many hops).
    Chain(String),
    Store(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgs(msg) => write!(f, "invalid arguments: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::ChecksumMismatch => write!(f, "checksum mismatch"),
            Error::Http(err) => write!(f, "http error: {err}"),
            Error::Ring(err) => write!(f, "ring buffer error: {err}"),
            Error::Csv(err) => write!(f, "{err}"),
            Error::Chain(msg) => write!(f, "addendum chain error: {msg}"),
            Error::Store(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<http::HttpError> for Error {
    fn from(value: http::HttpError) -> Self {
        Error::Http(value)
    }
}

impl From<ring::RingError> for Error {
    fn from(value: ring::RingError) -> Self {
        Error::Ring(value)
    }
}

impl From<csv::CsvError> for Error {
    fn from(value: csv::CsvError) -> Self {
        Error::Csv(value)
    }
}
