//! Device configuration and parameter snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::cloud::{DeviceId, ParamId, Parameter};
use crate::config::defaults::MISSING_VALUE;
use crate::error::SyncError;

/// Resolved identifiers of the monitored device.
///
/// Persisted as JSON with the field names below. Replaced wholesale on every
/// re-resolution; `sync_param_id` / `indicator_param_id` stay `None` until
/// discovery finds them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    #[serde(default, rename = "synchronization_param_id")]
    pub sync_param_id: Option<ParamId>,
    #[serde(default)]
    pub indicator_param_id: Option<ParamId>,
    /// Every parameter id in discovery order; drives export column order.
    #[serde(default)]
    pub parameter_ids: Vec<ParamId>,
    #[serde(default)]
    pub parameter_names: BTreeMap<ParamId, String>,
}

impl DeviceConfig {
    /// Export label of a parameter: its display name, or `Param_<id>`.
    pub fn parameter_name(&self, id: ParamId) -> String {
        self.parameter_names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("Param_{}", id))
    }

    /// Both the sync and the indicator parameter are known.
    pub fn is_complete(&self) -> bool {
        self.device_id.is_some() && self.sync_param_id.is_some() && self.indicator_param_id.is_some()
    }
}

/// Current raw value of every parameter, fetched in one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSnapshot {
    values: HashMap<ParamId, Value>,
}

impl ParameterSnapshot {
    /// Build from a device parameter listing; a missing value becomes `"N/A"`.
    pub fn from_parameters(parameters: Vec<Parameter>) -> Self {
        let values = parameters
            .into_iter()
            .map(|p| {
                let value = p.value.unwrap_or_else(|| Value::String(MISSING_VALUE.to_string()));
                (p.id, value)
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, id: ParamId) -> Option<&Value> {
        self.values.get(&id)
    }

    pub fn contains(&self, id: ParamId) -> bool {
        self.values.contains_key(&id)
    }

    /// Overwrite one value (used to patch in a freshly written indicator).
    pub fn set(&mut self, id: ParamId, value: Value) {
        self.values.insert(id, value);
    }

    /// Cell text of one parameter for export; absent ids become `"N/A"`.
    pub fn cell(&self, id: ParamId) -> String {
        match self.values.get(&id) {
            None | Some(Value::Null) => MISSING_VALUE.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl FromIterator<(ParamId, Value)> for ParameterSnapshot {
    fn from_iter<I: IntoIterator<Item = (ParamId, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Interpret a raw cloud value as a finite number.
///
/// Accepts JSON numbers and numeric strings (surrounding whitespace ignored).
pub fn numeric_value(raw: &Value) -> Result<f64, SyncError> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(SyncError::Parse(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_config_uses_persisted_field_names() {
        let mut config = DeviceConfig {
            device_id: Some(11),
            sync_param_id: Some(1),
            indicator_param_id: Some(2),
            parameter_ids: vec![1, 2],
            ..DeviceConfig::default()
        };
        config.parameter_names.insert(1, "Synchronization".into());
        config.parameter_names.insert(2, "Indicator_of_new_cycle".into());

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["synchronization_param_id"], json!(1));
        assert_eq!(json["parameter_names"]["2"], json!("Indicator_of_new_cycle"));

        let back: DeviceConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn device_config_tolerates_nulls_from_first_run() {
        let config: DeviceConfig = serde_json::from_str(
            r#"{"device_id": null, "synchronization_param_id": null,
                "indicator_param_id": null, "parameter_ids": [], "parameter_names": {}}"#,
        )
        .unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert!(!config.is_complete());
    }

    #[test]
    fn snapshot_marks_missing_values() {
        let snapshot = ParameterSnapshot::from_parameters(vec![
            Parameter { id: 1, name: None, code: None, value: Some(json!(5)) },
            Parameter { id: 2, name: None, code: None, value: None },
        ]);
        assert_eq!(snapshot.cell(1), "5");
        assert_eq!(snapshot.cell(2), "N/A");
        assert_eq!(snapshot.cell(3), "N/A");
    }

    #[test]
    fn numeric_value_accepts_numbers_and_numeric_strings() {
        assert_eq!(numeric_value(&json!(6)).unwrap(), 6.0);
        assert_eq!(numeric_value(&json!("6.5")).unwrap(), 6.5);
        assert_eq!(numeric_value(&json!(" 7 ")).unwrap(), 7.0);
    }

    #[test]
    fn numeric_value_rejects_non_numeric() {
        for raw in [json!("N/A"), json!(""), json!(null), json!(true), json!("NaN"), json!("inf")] {
            assert!(matches!(numeric_value(&raw), Err(SyncError::Parse(_))), "{raw}");
        }
    }
}
