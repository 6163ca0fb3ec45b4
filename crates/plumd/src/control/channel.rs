use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::directory::{DeviceRecord, PLUM_USER_AGENT};
use crate::discovery::DiscoveredDevice;
use crate::error::{Error, Result};

/// Header lightpads read the house access token from
const ACCESS_TOKEN_HEADER: &str = "X-Plum-House-Access-Token";

/// Per-lightpad entry of a logical load metrics report.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LightpadMetrics {
    pub lpid: String,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub power: f64,
}

/// Response of `getLogicalLoadMetrics`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MetricsReport {
    #[serde(default)]
    pub lightpad_metrics: Vec<LightpadMetrics>,
}

impl MetricsReport {
    /// Effective load level: the brightest member.
    pub fn level(&self) -> u8 {
        self.lightpad_metrics
            .iter()
            .map(|m| m.level)
            .max()
            .unwrap_or(0)
    }

    pub fn power(&self) -> f64 {
        self.lightpad_metrics.iter().map(|m| m.power).sum()
    }
}

/// Commands a lightpad's embedded web server accepts.
///
/// Mockable so the reconciler and load logic can be tested without devices.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Fetch level and power for every lightpad of `llid`.
    async fn get_metrics(&self, llid: &str) -> Result<MetricsReport>;

    /// Move the whole load to `level` (0 = off, 255 = full).
    async fn set_level(&self, llid: &str, level: u8) -> Result<()>;

    /// Apply a configuration patch.
    async fn set_config(&self, llid: &str, config: serde_json::Value) -> Result<()>;
}

/// Builds the control channel for a freshly reconciled lightpad.
pub trait Connector: Send + Sync {
    fn connect(&self, device: &DiscoveredDevice, record: &DeviceRecord) -> Arc<dyn ControlChannel>;
}

/// HTTPS control channel to one lightpad.
pub struct HttpsControl {
    http: reqwest::Client,
    lpid: String,
    base_url: String,
    access_token: String,
}

impl HttpsControl {
    async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
        expected: StatusCode,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/v2/{}", self.base_url, endpoint);
        debug!("POST {} ({})", url, self.lpid);

        let response = self
            .http
            .post(&url)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::unreachable(&self.lpid, e))?;

        if response.status() != expected {
            return Err(Error::unreachable(
                &self.lpid,
                format!("{} returned HTTP {}", endpoint, response.status()),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl ControlChannel for HttpsControl {
    async fn get_metrics(&self, llid: &str) -> Result<MetricsReport> {
        let response = self
            .post(
                "getLogicalLoadMetrics",
                serde_json::json!({ "llid": llid }),
                StatusCode::OK,
            )
            .await?;

        response
            .json()
            .await
            .map_err(|e| Error::unreachable(&self.lpid, e))
    }

    async fn set_level(&self, llid: &str, level: u8) -> Result<()> {
        self.post(
            "setLogicalLoadLevel",
            serde_json::json!({ "level": level, "llid": llid }),
            StatusCode::NO_CONTENT,
        )
        .await?;
        Ok(())
    }

    async fn set_config(&self, llid: &str, config: serde_json::Value) -> Result<()> {
        self.post(
            "setLogicalLoadConfig",
            serde_json::json!({ "config": config, "llid": llid }),
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
}

/// Connects lightpads over HTTPS, sharing one HTTP client.
///
/// Lightpads serve self-signed certificates, so certificate validation is
/// disabled for this client only.
pub struct HttpsConnector {
    http: reqwest::Client,
}

impl HttpsConnector {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(PLUM_USER_AGENT));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self { http })
    }
}

impl Connector for HttpsConnector {
    fn connect(&self, device: &DiscoveredDevice, record: &DeviceRecord) -> Arc<dyn ControlChannel> {
        let access_token = record.access_token.clone().unwrap_or_else(|| {
            warn!("Lightpad {} has no access token; commands will be rejected", device.lpid);
            String::new()
        });

        Arc::new(HttpsControl {
            http: self.http.clone(),
            lpid: device.lpid.clone(),
            base_url: format!("https://{}", device.address),
            access_token,
        })
    }
}
