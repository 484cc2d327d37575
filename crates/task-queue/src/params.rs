//! Keyword-style parameter bags passed to tasks.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{QueueError, Result};

/// Conventional parameter carrying a per-task timeout, in nanoseconds.
pub const TIMEOUT_PARAM: &str = "Timeout";

/// Named parameters for a task submission.
///
/// Values are JSON values so the bag survives any broker that serializes
/// submissions. Typed access goes through [`TaskParams::get`] and friends,
/// which report missing or mistyped keys as validation errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskParams(HashMap<String, Value>);

impl TaskParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builder-style insert of any serializable value.
    pub fn with_serialized<T: Serialize>(mut self, key: impl Into<String>, value: &T) -> Result<Self> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| {
            QueueError::validation(format!("parameter '{}' is not serializable: {}", key, e))
        })?;
        self.0.insert(key, value);
        Ok(self)
    }

    /// Attach a timeout under [`TIMEOUT_PARAM`].
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        self.with(TIMEOUT_PARAM, nanos)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Deserialize a parameter into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.require(key)?;
        serde_json::from_value(value.clone()).map_err(|e| {
            QueueError::validation(format!("parameter '{}' has unexpected type: {}", key, e))
        })
    }

    /// Borrow a string parameter.
    pub fn str(&self, key: &str) -> Result<&str> {
        self.require(key)?.as_str().ok_or_else(|| {
            QueueError::validation(format!("parameter '{}' is not a string", key))
        })
    }

    /// Read a duration expressed as a number of nanoseconds.
    pub fn duration(&self, key: &str) -> Result<Duration> {
        duration_from_value(self.require(key)?)
            .map_err(|msg| QueueError::validation(format!("parameter '{}' {}", key, msg)))
    }

    /// The optional [`TIMEOUT_PARAM`] value.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        if !self.contains(TIMEOUT_PARAM) {
            return Ok(None);
        }
        self.duration(TIMEOUT_PARAM).map(Some)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    fn require(&self, key: &str) -> Result<&Value> {
        self.0
            .get(key)
            .ok_or_else(|| QueueError::validation(format!("missing parameter '{}'", key)))
    }
}

impl From<HashMap<String, Value>> for TaskParams {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for TaskParams {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn duration_from_value(value: &Value) -> std::result::Result<Duration, &'static str> {
    if let Some(nanos) = value.as_u64() {
        return Ok(Duration::from_nanos(nanos));
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 => Ok(Duration::from_nanos(f as u64)),
        Some(_) => Err("must be a non-negative finite number"),
        None => Err("is not a number of nanoseconds"),
    }
}
