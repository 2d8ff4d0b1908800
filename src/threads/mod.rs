pub mod exporter;
pub mod listener;
pub mod maintenance;
pub mod uploader;
pub mod worker;

use log::{error, info};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::metrics::Metrics;
use crate::remote::Remote;
use crate::settings::Settings;
use crate::sink::{self, FlowSink};
use worker::{Dispatcher, Gauges, WorkerConfig};

/// Binds the configured address, builds the sink and runs the collector until
/// `shutdown` resolves.
///
/// With an upload or filter endpoint configured, the block list is fetched before the
/// first datagram and finished gzip files are handed to the uploader.
pub async fn run<F: Future<Output = ()>>(settings: &Settings, metrics: Arc<Metrics>, shutdown: F) -> Result<()> {
    let blocks = Arc::new(RwLock::new(sink::parse_cidr_blocks(&settings.filter.cidr_blocks)?));

    let (finished, uploader) = match Remote::from_settings(&settings.upload)? {
        Some(remote) => {
            remote.refresh(&blocks).await;
            let (finished_tx, finished_rx) = mpsc::channel(16);
            let task = tokio::spawn(uploader::run(remote, finished_rx, blocks.clone(), metrics.clone()));
            (Some(finished_tx), Some(task))
        }
        None => (None, None),
    };

    let address = settings.listener.address();
    let socket = UdpSocket::bind(&address).await?;
    info!("Listening on {}", address);

    let sink = sink::from_settings(&settings.sink, blocks, finished)?;
    let result = serve(socket, settings, sink, metrics, shutdown).await;

    // the sink thread is gone, so is the last sender of finished files
    if let Some(task) = uploader {
        if let Err(e) = task.await {
            error!("Uploader task failed: {}", e);
        }
    }

    result
}

/// Runs the collector on an already bound socket.
///
/// Stopping drops every worker queue; the workers drain what they hold, then the sink
/// thread drains the records and flushes.
pub async fn serve<F: Future<Output = ()>>(
    socket: UdpSocket,
    settings: &Settings,
    sink: Box<dyn FlowSink>,
    metrics: Arc<Metrics>,
    shutdown: F,
) -> Result<()> {
    let (record_tx, record_rx) = mpsc::channel(settings.sink.queue_depth.max(1));
    let sink_thread = exporter::spawn(sink, record_rx, metrics.clone())?;

    let gauges = Gauges::default();
    let (stop_tx, stop_rx) = watch::channel(false);
    let period = Duration::from_secs(settings.exporter.sweep_interval_secs.max(1));
    let maintenance = tokio::spawn(maintenance::run(gauges.clone(), metrics.clone(), period, stop_rx));

    let mut dispatcher = Dispatcher::new(WorkerConfig::from(&settings.exporter), record_tx, metrics.clone(), gauges);

    let result = tokio::select! {
        result = listener::listen(&socket, &mut dispatcher, metrics, settings.listener.recv_buffer) => result,
        _ = shutdown => {
            info!("Stopping the collector");
            Ok(())
        }
    };

    drop(dispatcher);
    let _ = stop_tx.send(true);
    if let Err(e) = maintenance.await {
        error!("Maintenance task failed: {}", e);
    }

    match tokio::task::spawn_blocking(move || sink_thread.join()).await {
        Ok(Ok(())) => {}
        _ => error!("Sink thread panicked"),
    }

    result
}
