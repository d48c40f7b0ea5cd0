//! Two-valued "new cycle" indicator and its confirmed write-back.
//!
//! The next value is always computed from local state. The remote value is
//! read once at startup and never again, because a snapshot can lag the most
//! recent local write by one poll.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::model::numeric_value;
use super::token::AuthToken;
use crate::cloud::{CloudApi, ParamId, ParameterWrite, WriteReceipt};
use crate::error::SyncError;

/// State of the indicator flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "u8")]
pub enum IndicatorValue {
    #[default]
    Zero,
    One,
}

impl IndicatorValue {
    /// `1 - self`.
    pub fn toggled(self) -> Self {
        match self {
            IndicatorValue::Zero => IndicatorValue::One,
            IndicatorValue::One => IndicatorValue::Zero,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            IndicatorValue::Zero => 0,
            IndicatorValue::One => 1,
        }
    }

    /// Coerce a remote value: numeric zero is `Zero`, any other number is
    /// `One`, anything unparseable defaults to `Zero`.
    pub fn from_remote(raw: Option<&Value>) -> Self {
        match raw.map(numeric_value) {
            Some(Ok(v)) if v.trunc() != 0.0 => IndicatorValue::One,
            _ => IndicatorValue::Zero,
        }
    }

    pub fn to_json(self) -> Value {
        Value::from(self.as_u8())
    }
}

impl From<IndicatorValue> for u8 {
    fn from(value: IndicatorValue) -> Self {
        value.as_u8()
    }
}

impl std::fmt::Display for IndicatorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Writes the indicator using confirmed (synchronous) mode.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorWriter {
    confirm_timeout: Duration,
}

impl IndicatorWriter {
    pub fn new(confirm_timeout: Duration) -> Self {
        Self { confirm_timeout }
    }

    /// Write `target` to `param_id`. Success means the cloud returned a write group id.
    pub async fn write<A: CloudApi + ?Sized>(
        &self,
        api: &A,
        token: &AuthToken,
        param_id: ParamId,
        target: IndicatorValue,
    ) -> Result<WriteReceipt, SyncError> {
        let writes = [ParameterWrite {
            id: param_id,
            value: target.as_u8().to_string(),
        }];
        api.write_parameters(token.as_str(), &writes, self.confirm_timeout)
            .await
    }
}
