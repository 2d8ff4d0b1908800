use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::metrics::Metrics;
use crate::remote::Remote;
use crate::sink::SharedBlocks;

/// Uploads every finished file, deletes it once accepted, then refreshes the block list.
///
/// Ends when the sink drops its side of `finished`. A file whose upload failed stays on
/// disk.
pub async fn run(remote: Remote, mut finished: mpsc::Receiver<PathBuf>, blocks: SharedBlocks, metrics: Arc<Metrics>) {
    while let Some(path) = finished.recv().await {
        if remote.uploads() {
            match remote.upload(&path).await {
                Ok(()) => {
                    Metrics::incr(&metrics.files_uploaded);
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!("Failed to remove {}: {}", path.display(), e);
                    }
                }
                Err(e) => {
                    Metrics::incr(&metrics.upload_failures);
                    warn!("Failed to upload {}: {}", path.display(), e);
                }
            }
        }

        remote.refresh(&blocks).await;
    }

    info!("Uploader closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::stub;
    use crate::settings::Upload;
    use ipnet::IpNet;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[tokio::test]
    async fn upload_delete_and_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let uploaded = dir.path().join("1000.gz");
        let rejected = dir.path().join("1300.gz");
        std::fs::write(&uploaded, b"first").unwrap();
        std::fs::write(&rejected, b"second").unwrap();

        let (url, server) = stub::serve(vec![
            (200, ""),
            (200, r#"[{"ip_range": "10.0.0.0/8"}]"#),
            (403, ""),
            (200, r#"[{"ip_range": "10.0.0.0/8"}, {"ip_range": "172.16.0.0/12"}]"#),
        ])
        .await;

        let settings = Upload {
            url: Some(format!("{}/upload", url)),
            filter_url: Some(format!("{}/filters", url)),
            retries: 0,
            ..Upload::default()
        };
        let remote = Remote::from_settings(&settings).unwrap().unwrap();
        let blocks = SharedBlocks::default();
        let metrics = Arc::new(Metrics::default());
        let (sender, receiver) = mpsc::channel(4);

        sender.send(uploaded.clone()).await.unwrap();
        sender.send(rejected.clone()).await.unwrap();
        drop(sender);
        run(remote, receiver, blocks.clone(), metrics.clone()).await;

        assert!(!uploaded.exists());
        assert!(rejected.exists());
        assert_eq!(*blocks.read(), vec![IpNet::from_str("10.0.0.0/8").unwrap(), IpNet::from_str("172.16.0.0/12").unwrap()]);
        assert_eq!(metrics.snapshot()["files_uploaded"], 1);
        assert_eq!(metrics.snapshot()["upload_failures"], 1);
        assert_eq!(server.await.unwrap().len(), 4);
    }
}
