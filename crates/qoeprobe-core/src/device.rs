//! Device identity attached to exported reports

use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default IP information endpoint
pub const DEFAULT_IPINFO_URL: &str = "https://ipinfo.io/json";

/// ISP label used when the lookup fails
pub const UNKNOWN_ISP: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
    #[serde(rename = "ISP_name")]
    pub isp_name: String,
    pub network_type: String,
}

/// Supplies device information for a report
#[async_trait]
pub trait DeviceInfoProvider: Send + Sync {
    async fn device_info(&self) -> Result<DeviceInfo>;
}

#[derive(Debug, Deserialize)]
struct IpInfo {
    org: Option<String>,
}

/// Device information from the local system.
///
/// The device id is a v4 UUID persisted at `id_path`, generated on first use.
/// The ISP is the `org` field of the IP information endpoint.
pub struct SystemDeviceInfo {
    id_path: PathBuf,
    ipinfo_url: String,
    client: Client,
}

impl SystemDeviceInfo {
    pub fn new(id_path: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self {
            id_path: id_path.into(),
            ipinfo_url: DEFAULT_IPINFO_URL.to_string(),
            client,
        })
    }

    pub fn with_ipinfo_url(mut self, url: impl Into<String>) -> Self {
        self.ipinfo_url = url.into();
        self
    }

    /// Read the persisted id, creating it if absent
    pub fn device_id(&self) -> Result<String> {
        load_or_create_id(&self.id_path)
    }

    async fn isp_name(&self) -> String {
        let lookup = async {
            let info: IpInfo = self
                .client
                .get(&self.ipinfo_url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, reqwest::Error>(info.org)
        };

        match lookup.await {
            Ok(Some(org)) => org,
            Ok(None) => UNKNOWN_ISP.to_string(),
            Err(e) => {
                warn!(error = %e, "ISP lookup failed");
                UNKNOWN_ISP.to_string()
            }
        }
    }
}

#[async_trait]
impl DeviceInfoProvider for SystemDeviceInfo {
    async fn device_info(&self) -> Result<DeviceInfo> {
        let info = DeviceInfo {
            device_id: self.device_id()?,
            device_name: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            device_type: device_type().to_string(),
            isp_name: self.isp_name().await,
            network_type: "WIFI".to_string(),
        };
        debug!(device_id = %info.device_id, isp = %info.isp_name, "Device info collected");
        Ok(info)
    }
}

fn device_type() -> &'static str {
    match std::env::consts::OS {
        "android" | "ios" => "mobile",
        _ => "desktop",
    }
}

fn load_or_create_id(path: &Path) -> Result<String> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let existing = existing.trim();
        if Uuid::parse_str(existing).is_ok() {
            return Ok(existing.to_string());
        }
        warn!(path = %path.display(), "Stored device id is invalid, regenerating");
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, &id)?;
    Ok(id)
}
