//! OWEN Cloud wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Device identifier as issued by the cloud.
pub type DeviceId = i64;

/// Parameter identifier as issued by the cloud.
pub type ParamId = i64;

/// Entry of `POST /device/index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub name: Option<String>,
}

impl Device {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed")
    }
}

/// Entry of the `parameters` array returned by `POST /device/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ParamId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    /// Raw value: the cloud returns numbers or strings depending on the parameter type.
    #[serde(default)]
    pub value: Option<Value>,
}

impl Parameter {
    /// Display name used for export headers; `Param_<id>` when unnamed.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("Param_{}", self.id),
        }
    }
}

/// Body of `POST /device/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceDetails {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// Login request body.
#[derive(Debug, Serialize)]
pub(crate) struct AuthRequest<'a> {
    pub login: &'a str,
    pub password: &'a str,
}

/// Login response body.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// One `{id, value}` pair of a write request. Values are always sent as strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterWrite {
    pub id: ParamId,
    pub value: String,
}

/// Body of `POST /parameters/write-data`.
#[derive(Debug, Serialize)]
pub(crate) struct WriteRequest<'a> {
    pub timeout: u64,
    pub sync: bool,
    pub data: &'a [ParameterWrite],
}

/// Confirmation of an accepted write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    pub write_group_id: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_tolerates_missing_fields() {
        let p: Parameter = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        assert_eq!(p.label(), "Param_7");
        assert!(p.code.is_none());
        assert!(p.value.is_none());
    }

    #[test]
    fn write_request_serializes_sync_mode() {
        let data = [ParameterWrite { id: 2, value: "1".into() }];
        let body = serde_json::to_value(WriteRequest { timeout: 60, sync: true, data: &data }).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"timeout": 60, "sync": true, "data": [{"id": 2, "value": "1"}]})
        );
    }
}
