//! Cloud Client - HTTP client for the OWEN Cloud REST API
//!
//! Handles login, device discovery, parameter reads and confirmed writes.
//! Every endpoint is a `POST` with a bearer token except the login itself.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use super::types::{
    AuthRequest, AuthResponse, Device, DeviceDetails, DeviceId, Parameter, ParameterWrite,
    WriteReceipt, WriteRequest,
};
use crate::config::CloudConfig;
use crate::error::SyncError;

/// Remote operations the synchronizer depends on.
///
/// Implemented by [`CloudClient`] for the real service and by in-memory
/// fakes in tests.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Exchange credentials for a bearer token.
    async fn login(&self, login: &str, password: &str) -> Result<String, SyncError>;

    /// List every device visible to the account.
    async fn list_devices(&self, token: &str) -> Result<Vec<Device>, SyncError>;

    /// Fetch the full parameter set (ids, names, codes and current values) of one device.
    async fn device_parameters(
        &self,
        token: &str,
        device_id: DeviceId,
    ) -> Result<Vec<Parameter>, SyncError>;

    /// Write parameter values in synchronous mode.
    ///
    /// `confirm_timeout` is the server-side confirmation window, independent
    /// of the HTTP transport timeout.
    async fn write_parameters(
        &self,
        token: &str,
        writes: &[ParameterWrite],
        confirm_timeout: Duration,
    ) -> Result<WriteReceipt, SyncError>;
}

/// reqwest-backed OWEN Cloud client
#[derive(Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    api_url: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl CloudClient {
    /// Create a new client from the `[cloud]` config section.
    pub fn new(config: &CloudConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("owencloud-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            write_timeout: Duration::from_secs(config.write_transport_timeout_secs),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    /// Authorized POST with the read timeout, mapping non-200 statuses.
    async fn post_read<B: serde::Serialize + ?Sized>(
        &self,
        token: &str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, SyncError> {
        let resp = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(token)
            .header("Accept", "*/*")
            .json(body)
            .timeout(self.read_timeout)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => Ok(resp),
            StatusCode::UNAUTHORIZED => Err(SyncError::Auth(format!("{} rejected token (401)", path))),
            status => Err(SyncError::Network(format!("{} returned HTTP {}", path, status))),
        }
    }
}

#[async_trait]
impl CloudApi for CloudClient {
    async fn login(&self, login: &str, password: &str) -> Result<String, SyncError> {
        let resp = self
            .http
            .post(self.endpoint("auth/open"))
            .header("Accept", "*/*")
            .json(&AuthRequest { login, password })
            .timeout(self.read_timeout)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!("HTTP {}: {}", status, body.trim())));
        }

        let auth: AuthResponse = resp.json().await?;
        match auth.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(SyncError::Auth("token missing from login response".to_string())),
        }
    }

    async fn list_devices(&self, token: &str) -> Result<Vec<Device>, SyncError> {
        let resp = self
            .post_read(token, "device/index", &serde_json::json!({}))
            .await?;
        let devices: Vec<Device> = resp.json().await?;
        debug!(count = devices.len(), "Listed devices");
        Ok(devices)
    }

    async fn device_parameters(
        &self,
        token: &str,
        device_id: DeviceId,
    ) -> Result<Vec<Parameter>, SyncError> {
        let path = format!("device/{}", device_id);
        let resp = self.post_read(token, &path, &serde_json::json!([])).await?;
        let details: DeviceDetails = resp.json().await?;
        Ok(details.parameters)
    }

    async fn write_parameters(
        &self,
        token: &str,
        writes: &[ParameterWrite],
        confirm_timeout: Duration,
    ) -> Result<WriteReceipt, SyncError> {
        let body = WriteRequest {
            timeout: confirm_timeout.as_secs(),
            sync: true,
            data: writes,
        };

        let resp = self
            .http
            .post(self.endpoint("parameters/write-data"))
            .bearer_auth(token)
            .header("Accept", "*/*")
            .json(&body)
            .timeout(self.write_timeout)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => {
                let result: serde_json::Value = resp.json().await?;
                match result.get("writeGroupId") {
                    Some(id) => Ok(WriteReceipt {
                        write_group_id: id.clone(),
                    }),
                    None => Err(SyncError::Write(format!("unconfirmed write: {}", result))),
                }
            }
            StatusCode::UNAUTHORIZED => Err(SyncError::Auth("write rejected token (401)".to_string())),
            status => {
                let text = resp.text().await.unwrap_or_default();
                Err(SyncError::Write(format!("HTTP {}: {}", status, text.trim())))
            }
        }
    }
}
