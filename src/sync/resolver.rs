//! Self-healing device / parameter identifier resolver.
//!
//! Resolution runs in three steps. [`select_device`] picks the device,
//! [`classify_parameters`] scans its parameter list, and [`merge`] combines
//! the result with the prior config. `merge` never replaces a known sync or
//! indicator id with "not found".

use std::collections::BTreeMap;
use tracing::{info, warn};

use super::model::DeviceConfig;
use super::token::AuthToken;
use crate::cloud::{CloudApi, Device, DeviceId, ParamId, Parameter};
use crate::error::SyncError;

const SYNC_KEYWORD: &str = "synchronization";
const INDICATOR_CODE: &str = "indicator_of_new_cycle";

/// Outcome of scanning one device's parameter list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub device_id: DeviceId,
    pub sync_param_id: Option<ParamId>,
    pub indicator_param_id: Option<ParamId>,
    pub parameter_ids: Vec<ParamId>,
    pub parameter_names: BTreeMap<ParamId, String>,
}

/// Keep the previously selected device when it is still listed, otherwise
/// fall back to the first one (first run or replaced hardware).
pub fn select_device(devices: &[Device], prior: Option<DeviceId>) -> Option<&Device> {
    prior
        .and_then(|id| devices.iter().find(|d| d.id == id))
        .or_else(|| devices.first())
}

fn lower(field: Option<&String>) -> String {
    field.map(|s| s.to_lowercase()).unwrap_or_default()
}

/// Sync parameter: name contains "synchronization" or code equals it.
pub fn is_sync_parameter(param: &Parameter) -> bool {
    lower(param.name.as_ref()).contains(SYNC_KEYWORD) || lower(param.code.as_ref()) == SYNC_KEYWORD
}

/// Indicator parameter: name mentions both "indicator" and "cycle", or the
/// code is `indicator_of_new_cycle`.
pub fn is_indicator_parameter(param: &Parameter) -> bool {
    let name = lower(param.name.as_ref());
    (name.contains("indicator") && name.contains("cycle"))
        || lower(param.code.as_ref()) == INDICATOR_CODE
}

/// Scan a parameter list. The first match wins for sync and indicator; every
/// id is recorded in discovery order regardless.
pub fn classify_parameters(device_id: DeviceId, parameters: &[Parameter]) -> Discovery {
    let mut discovery = Discovery {
        device_id,
        ..Discovery::default()
    };

    for param in parameters {
        if discovery.sync_param_id.is_none() && is_sync_parameter(param) {
            info!(param_id = param.id, name = %param.label(), "Found synchronization parameter");
            discovery.sync_param_id = Some(param.id);
        }
        if discovery.indicator_param_id.is_none() && is_indicator_parameter(param) {
            info!(param_id = param.id, name = %param.label(), "Found indicator_of_new_cycle parameter");
            discovery.indicator_param_id = Some(param.id);
        }
        if !discovery.parameter_ids.contains(&param.id) {
            discovery.parameter_ids.push(param.id);
        }
        discovery.parameter_names.insert(param.id, param.label());
    }

    discovery
}

/// Combine a fresh discovery with the prior config.
///
/// Device and parameter lists always come from the discovery. An unmatched
/// sync or indicator slot keeps the prior id (or stays `None`).
pub fn merge(discovered: Discovery, prior: Option<&DeviceConfig>) -> DeviceConfig {
    DeviceConfig {
        device_id: Some(discovered.device_id),
        sync_param_id: discovered
            .sync_param_id
            .or_else(|| prior.and_then(|p| p.sync_param_id)),
        indicator_param_id: discovered
            .indicator_param_id
            .or_else(|| prior.and_then(|p| p.indicator_param_id)),
        parameter_ids: discovered.parameter_ids,
        parameter_names: discovered.parameter_names,
    }
}

/// Discover the device and its parameter identifiers.
///
/// Fails only when no device or no parameter can be listed. A missing sync or
/// indicator match is a soft failure: it is logged and the slot is carried
/// over from `prior`.
pub async fn resolve<A: CloudApi + ?Sized>(
    api: &A,
    token: &AuthToken,
    prior: Option<&DeviceConfig>,
) -> Result<DeviceConfig, SyncError> {
    info!("Resolving device configuration...");

    let devices = api
        .list_devices(token.as_str())
        .await
        .map_err(|e| match e {
            SyncError::Auth(_) => e,
            other => SyncError::Resolution(format!("device list unavailable: {}", other)),
        })?;

    let prior_device = prior.and_then(|p| p.device_id);
    let device = select_device(&devices, prior_device)
        .ok_or_else(|| SyncError::Resolution("account has no devices".to_string()))?;
    if let Some(old) = prior_device {
        if old != device.id {
            warn!(old_device = old, new_device = device.id, "Previous device not listed, switching to first available");
        }
    }
    info!(device_id = device.id, name = %device.display_name(), "Selected device");

    let parameters = api
        .device_parameters(token.as_str(), device.id)
        .await
        .map_err(|e| match e {
            SyncError::Auth(_) => e,
            other => SyncError::Resolution(format!("parameters unavailable: {}", other)),
        })?;
    if parameters.is_empty() {
        return Err(SyncError::Resolution(format!(
            "device {} reports no parameters",
            device.id
        )));
    }
    info!(count = parameters.len(), "Parameters discovered");

    let discovery = classify_parameters(device.id, &parameters);
    if discovery.sync_param_id.is_none() {
        warn!("Parameter 'synchronization' not found, keeping previous id if any");
    }
    if discovery.indicator_param_id.is_none() {
        warn!("Parameter 'indicator_of_new_cycle' not found, keeping previous id if any");
    }

    Ok(merge(discovery, prior))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(id: ParamId, name: &str, code: &str) -> Parameter {
        Parameter {
            id,
            name: (!name.is_empty()).then(|| name.to_string()),
            code: (!code.is_empty()).then(|| code.to_string()),
            value: None,
        }
    }

    fn device(id: DeviceId) -> Device {
        Device { id, name: Some(format!("dev-{id}")) }
    }

    #[test]
    fn prefers_prior_device_when_listed() {
        let devices = [device(1), device(2), device(3)];
        assert_eq!(select_device(&devices, Some(2)).unwrap().id, 2);
    }

    #[test]
    fn falls_back_to_first_device() {
        let devices = [device(1), device(2)];
        assert_eq!(select_device(&devices, Some(99)).unwrap().id, 1);
        assert_eq!(select_device(&devices, None).unwrap().id, 1);
        assert!(select_device(&[], Some(1)).is_none());
    }

    #[test]
    fn matches_by_name_or_code_case_insensitively() {
        assert!(is_sync_parameter(&param(1, "SYNCHRONIZATION counter", "")));
        assert!(is_sync_parameter(&param(1, "Counter", "Synchronization")));
        assert!(!is_sync_parameter(&param(1, "sync", "sync")));

        assert!(is_indicator_parameter(&param(2, "Indicator_of_new_cycle", "")));
        assert!(is_indicator_parameter(&param(2, "New CYCLE indicator", "")));
        assert!(is_indicator_parameter(&param(2, "Flag", "INDICATOR_OF_NEW_CYCLE")));
        assert!(!is_indicator_parameter(&param(2, "Indicator", "")));
    }

    #[test]
    fn classify_records_every_parameter_in_order() {
        let params = [
            param(30, "Temperature", ""),
            param(10, "Synchronization", ""),
            param(20, "Indicator_of_new_cycle", ""),
            param(40, "", ""),
        ];
        let d = classify_parameters(7, &params);
        assert_eq!(d.sync_param_id, Some(10));
        assert_eq!(d.indicator_param_id, Some(20));
        assert_eq!(d.parameter_ids, vec![30, 10, 20, 40]);
        assert_eq!(d.parameter_names[&40], "Param_40");
    }

    #[test]
    fn first_match_wins_on_duplicates() {
        let params = [param(5, "synchronization A", ""), param(6, "synchronization B", "")];
        assert_eq!(classify_parameters(1, &params).sync_param_id, Some(5));
    }

    #[test]
    fn merge_never_erases_known_ids() {
        let prior = DeviceConfig {
            device_id: Some(1),
            sync_param_id: Some(10),
            indicator_param_id: Some(20),
            parameter_ids: vec![10, 20],
            ..DeviceConfig::default()
        };
        let discovered = Discovery {
            device_id: 1,
            parameter_ids: vec![11, 21, 31],
            ..Discovery::default()
        };

        let merged = merge(discovered, Some(&prior));
        assert_eq!(merged.sync_param_id, Some(10));
        assert_eq!(merged.indicator_param_id, Some(20));
        assert_eq!(merged.parameter_ids, vec![11, 21, 31]);
    }

    #[test]
    fn merge_prefers_fresh_matches() {
        let prior = DeviceConfig {
            sync_param_id: Some(10),
            indicator_param_id: Some(20),
            ..DeviceConfig::default()
        };
        let discovered = Discovery {
            device_id: 2,
            sync_param_id: Some(11),
            indicator_param_id: None,
            ..Discovery::default()
        };
        let merged = merge(discovered, Some(&prior));
        assert_eq!(merged.device_id, Some(2));
        assert_eq!(merged.sync_param_id, Some(11));
        assert_eq!(merged.indicator_param_id, Some(20));
    }

    #[test]
    fn merge_without_prior_leaves_slots_absent() {
        let merged = merge(Discovery { device_id: 3, ..Discovery::default() }, None);
        assert_eq!(merged.sync_param_id, None);
        assert_eq!(merged.indicator_param_id, None);
        assert!(!merged.is_complete());
    }
}
