//! Consumers of normalized records.

use flate2::write::GzEncoder;
use flate2::Compression;
use ipnet::IpNet;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::error::{Error, SinkError};
use crate::flow::FieldValue;
use crate::normalize::{FlowRecord, RecordKind};
use crate::settings::{Sink, SinkKind};

pub trait FlowSink: Send {
    fn emit(&mut self, record: FlowRecord) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called periodically by the sink thread, with or without traffic.
    fn tick(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: FlowSink + ?Sized> FlowSink for Box<S> {
    fn emit(&mut self, record: FlowRecord) -> Result<(), SinkError> {
        (**self).emit(record)
    }

    fn tick(&mut self) -> Result<(), SinkError> {
        (**self).tick()
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/******************************** LOG ********************************/

/// Writes every record to the log at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl FlowSink for LogSink {
    fn emit(&mut self, record: FlowRecord) -> Result<(), SinkError> {
        info!("{}", record);
        Ok(())
    }
}

/******************************** JSON LINES ********************************/

/// One JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> FlowSink for JsonLinesSink<W> {
    fn emit(&mut self, record: FlowRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/******************************** ROTATING GZIP ********************************/

/// Gzip-compressed JSON lines in `<directory>/<epoch>.gz`, a new file every `rotate_secs`.
///
/// A file that already exists is appended to as a new gzip member. Once a file is
/// complete its path is sent to the `finished` queue, if any.
pub struct RotatingGzipSink {
    directory: PathBuf,
    rotate_secs: u64,
    current: Option<(u64, GzEncoder<BufWriter<File>>)>,
    finished: Option<mpsc::Sender<PathBuf>>,
}

fn epoch_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl RotatingGzipSink {
    pub fn new(directory: &Path, rotate_secs: u64) -> Result<Self, SinkError> {
        fs::create_dir_all(directory)?;
        Ok(RotatingGzipSink { directory: directory.to_path_buf(), rotate_secs: rotate_secs.max(1), current: None, finished: None })
    }

    pub fn with_finished(mut self, finished: mpsc::Sender<PathBuf>) -> Self {
        self.finished = Some(finished);
        self
    }

    pub fn path_for(&self, epoch: u64) -> PathBuf {
        self.directory.join(format!("{}.gz", epoch))
    }

    fn close_current(&mut self) -> Result<(), SinkError> {
        if let Some((epoch, encoder)) = self.current.take() {
            encoder.finish()?.flush()?;
            let path = self.path_for(epoch);
            debug!("closed {}", path.display());

            if let Some(finished) = &self.finished {
                if finished.blocking_send(path).is_err() {
                    warn!("finished files are no longer collected");
                    self.finished = None;
                }
            }
        }
        Ok(())
    }

    fn expired(&self, now: u64) -> bool {
        match &self.current {
            Some((opened, _)) => now >= opened + self.rotate_secs,
            None => true,
        }
    }

    /// Closes the current file once its period is over, even without new records.
    pub fn tick_at(&mut self, now: u64) -> Result<(), SinkError> {
        if self.current.is_some() && self.expired(now) {
            self.close_current()?;
        }
        Ok(())
    }

    /// Emits `record` as if the clock read `now` seconds since the epoch.
    pub fn emit_at(&mut self, record: &FlowRecord, now: u64) -> Result<(), SinkError> {
        if self.expired(now) {
            self.close_current()?;
            let path = self.path_for(now);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!("writing records to {}", path.display());
            self.current = Some((now, GzEncoder::new(BufWriter::new(file), Compression::default())));
        }

        if let Some((_, encoder)) = self.current.as_mut() {
            serde_json::to_writer(&mut *encoder, record)?;
            encoder.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl FlowSink for RotatingGzipSink {
    fn emit(&mut self, record: FlowRecord) -> Result<(), SinkError> {
        self.emit_at(&record, epoch_now())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.close_current()
    }

    fn tick(&mut self) -> Result<(), SinkError> {
        self.tick_at(epoch_now())
    }
}

impl Drop for RotatingGzipSink {
    fn drop(&mut self) {
        let _ = self.close_current();
    }
}

/******************************** CIDR FILTER ********************************/

/// Block list shared with the task that refreshes it.
pub type SharedBlocks = Arc<RwLock<Vec<IpNet>>>;

/// Forwards flow records whose source or destination address lies in one of `blocks`.
///
/// An empty block list forwards everything. Options records carry no flow addresses
/// and are always forwarded.
pub struct FilteredSink<S: FlowSink> {
    inner: S,
    blocks: SharedBlocks,
}

fn address(value: Option<&FieldValue>) -> Option<IpAddr> {
    match value? {
        FieldValue::Ipv4(addr) => Some(IpAddr::V4(*addr)),
        FieldValue::Ipv6(addr) => Some(IpAddr::V6(*addr)),
        _ => None,
    }
}

impl<S: FlowSink> FilteredSink<S> {
    pub fn new(inner: S, blocks: SharedBlocks) -> Self {
        FilteredSink { inner, blocks }
    }

    pub fn accepts(&self, record: &FlowRecord) -> bool {
        let blocks = self.blocks.read();
        if blocks.is_empty() || record.kind == RecordKind::Options {
            return true;
        }

        [address(record.get("src_addr")), address(record.get("dst_addr"))]
            .iter()
            .flatten()
            .any(|addr| blocks.iter().any(|block| block.contains(addr)))
    }
}

impl<S: FlowSink> FlowSink for FilteredSink<S> {
    fn emit(&mut self, record: FlowRecord) -> Result<(), SinkError> {
        if self.accepts(&record) {
            self.inner.emit(record)
        } else {
            Ok(())
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()
    }

    fn tick(&mut self) -> Result<(), SinkError> {
        self.inner.tick()
    }
}

pub fn parse_cidr_blocks(blocks: &[String]) -> Result<Vec<IpNet>, Error> {
    blocks
        .iter()
        .map(|block| {
            IpNet::from_str(block.trim())
                .map_err(|e| Error::Config(config::ConfigError::Message(format!("invalid cidr block {}: {}", block, e))))
        })
        .collect()
}

/// Builds the configured sink, wrapped in the CIDR filter.
///
/// Finished gzip files are announced on `finished` when it is given.
pub fn from_settings(sink: &Sink, blocks: SharedBlocks, finished: Option<mpsc::Sender<PathBuf>>) -> Result<Box<dyn FlowSink>, Error> {
    Ok(match sink.kind {
        SinkKind::Log => Box::new(FilteredSink::new(LogSink, blocks)),
        SinkKind::Json => Box::new(FilteredSink::new(JsonLinesSink::new(BufWriter::new(std::io::stdout())), blocks)),
        SinkKind::Gzip => {
            let mut gzip = RotatingGzipSink::new(&sink.directory, sink.rotate_secs)?;
            if let Some(finished) = finished {
                gzip = gzip.with_finished(finished);
            }
            Box::new(FilteredSink::new(gzip, blocks))
        }
    })
}
