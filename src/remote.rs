//! HTTP side of the gzip sink: finished files go up, the CIDR block list comes down.

use ipnet::IpNet;
use log::{debug, info, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::time;

use crate::error::SinkError;
use crate::settings::Upload;
use crate::sink::SharedBlocks;

#[derive(Debug, Deserialize)]
struct FilterRow {
    ip_range: String,
}

/// Parses the filter endpoint reply, a JSON array of `{"ip_range": "<cidr>"}` rows.
pub fn decode_blocks(payload: &[u8]) -> Result<Vec<IpNet>, SinkError> {
    let rows: Vec<FilterRow> = serde_json::from_slice(payload)?;

    rows.into_iter()
        .map(|row| {
            IpNet::from_str(row.ip_range.trim()).map_err(|e| SinkError::InvalidBlock { block: row.ip_range.clone(), reason: e.to_string() })
        })
        .collect()
}

fn check_status(url: &str, status: StatusCode) -> Result<(), SinkError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SinkError::Status { url: url.to_string(), status: status.as_u16() })
    }
}

pub struct Remote {
    client: Client,
    url: Option<String>,
    filter_url: Option<String>,
    auth_token: String,
    client_id: String,
    retries: u32,
    backoff: Duration,
}

impl Remote {
    /// `None` when neither an upload nor a filter endpoint is configured.
    pub fn from_settings(upload: &Upload) -> Result<Option<Self>, SinkError> {
        if !upload.enabled() {
            return Ok(None);
        }

        let client = Client::builder().timeout(Duration::from_secs(upload.timeout_secs.max(1))).build()?;

        Ok(Some(Remote {
            client,
            url: upload.url.clone(),
            filter_url: upload.filter_url.clone(),
            auth_token: upload.auth_token.clone(),
            client_id: upload.client_id.clone(),
            retries: upload.retries,
            backoff: Duration::from_millis(upload.backoff_ms),
        }))
    }

    pub fn uploads(&self) -> bool {
        self.url.is_some()
    }

    async fn upload_once(&self, url: &str, path: &Path) -> Result<(), SinkError> {
        let data = tokio::fs::read(path).await?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        let form = Form::new().text("clientId", self.client_id.clone()).part("file", Part::bytes(data).file_name(name));
        let response = self.client.post(url).header(AUTHORIZATION, &self.auth_token).multipart(form).send().await?;

        check_status(url, response.status())
    }

    /// Posts the file at `path`, retrying with a growing pause. Does nothing without an
    /// upload endpoint.
    pub async fn upload(&self, path: &Path) -> Result<(), SinkError> {
        let url = match &self.url {
            Some(url) => url,
            None => return Ok(()),
        };

        let mut attempt = 0;
        loop {
            match self.upload_once(url, path).await {
                Ok(()) => {
                    debug!("uploaded {}", path.display());
                    return Ok(());
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    debug!("upload of {} failed: {}, retry {} of {}", path.display(), e, attempt, self.retries);
                    time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Current block list of the filter endpoint, `None` without one.
    pub async fn cidr_blocks(&self) -> Result<Option<Vec<IpNet>>, SinkError> {
        let url = match &self.filter_url {
            Some(url) => url,
            None => return Ok(None),
        };

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, &self.auth_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        check_status(url, response.status())?;

        let payload = response.bytes().await?;
        decode_blocks(&payload).map(Some)
    }

    /// Replaces `blocks` with the filter endpoint's list. The previous list stays on failure.
    pub async fn refresh(&self, blocks: &SharedBlocks) {
        match self.cidr_blocks().await {
            Ok(Some(fresh)) => {
                if fresh.is_empty() {
                    info!("The filter endpoint lists no CIDR blocks, every flow is forwarded");
                } else {
                    debug!("{} CIDR blocks loaded", fresh.len());
                }
                *blocks.write() = fresh;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to refresh the CIDR blocks: {}", e),
        }
    }
}
