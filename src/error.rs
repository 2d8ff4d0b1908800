use std::io;
use thiserror::Error;

/// Errors raised while reading flow-export bytes off the wire.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    #[error("not enough space in buffer to read {what}, required {need} but received {have}")]
    Truncated { what: &'static str, need: usize, have: usize },

    #[error("unsupported export version {0}, expected 5, 9 or 10")]
    UnsupportedVersion(u16),

    #[error("field {type_code} of length {length} exceeds the {remaining} remaining bytes")]
    FieldOverrun { type_code: u16, length: usize, remaining: usize },

    #[error("set {set_id} declares length {length} but {remaining} bytes remain in the packet")]
    InvalidSetLength { set_id: u16, length: u16, remaining: usize },

    #[error("declared {what} of {declared} bytes does not match the {actual} bytes received")]
    LengthMismatch { what: &'static str, declared: usize, actual: usize },

    #[error("data set for template {template_id} ends with a partial record of {leftover} bytes")]
    TrailingPartialRecord { template_id: u16, leftover: usize },

    #[error("invalid template {template_id}: {reason}")]
    InvalidTemplate { template_id: u16, reason: &'static str },

    #[error("reserved set id {0}")]
    ReservedSetId(u16),
}

/// Errors surfaced by a flow record sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink is closed")]
    Closed,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("invalid cidr block {block}: {reason}")]
    InvalidBlock { block: String, reason: String },
}

/// Top level collector errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket level failure, fatal to the listener.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Bad header or length, the whole packet is dropped.
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] DecodeError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub type Result<T> = std::result::Result<T, Error>;
