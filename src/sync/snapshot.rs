//! Snapshot fetcher: one read of every parameter of the resolved device.

use super::model::{DeviceConfig, ParameterSnapshot};
use super::token::AuthToken;
use crate::cloud::CloudApi;
use crate::error::SyncError;

/// Fetch the current value of every parameter of `config.device_id`.
///
/// Fails with `Resolution` when no device has been resolved yet, and with
/// `Network` when the cloud answers with an empty parameter list.
pub async fn fetch_snapshot<A: CloudApi + ?Sized>(
    api: &A,
    token: &AuthToken,
    config: &DeviceConfig,
) -> Result<ParameterSnapshot, SyncError> {
    let device_id = config
        .device_id
        .ok_or_else(|| SyncError::Resolution("device not resolved".to_string()))?;
    let parameters = api.device_parameters(token.as_str(), device_id).await?;
    if parameters.is_empty() {
        return Err(SyncError::Network(format!(
            "device {} returned no parameters",
            device_id
        )));
    }
    Ok(ParameterSnapshot::from_parameters(parameters))
}
