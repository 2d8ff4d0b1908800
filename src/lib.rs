//! NetFlow v5/v9 and IPFIX collector.
//!
//! Datagrams are split by exporter, decoded against the templates each exporter has
//! announced, normalized to a common field schema and handed to a `FlowSink`.

pub mod decoder;
pub mod entity;
pub mod error;
pub mod flow;
pub mod logger;
pub mod metrics;
pub mod normalize;
pub mod remote;
pub mod settings;
pub mod sink;
pub mod template;
pub mod threads;

pub use decoder::{DecodeStats, Decoder, PacketReport};
pub use error::{DecodeError, Error, Result, SinkError};
pub use normalize::FlowRecord;
pub use sink::FlowSink;
