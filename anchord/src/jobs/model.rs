//! Job domain model.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;
use uuid::Uuid;

use crate::{Error, Result};

/// Length of an account identifier in bytes.
pub const DID_LENGTH: usize = 20;

/// Account identifier owning a job.
///
/// Rendered as `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Did([u8; DID_LENGTH]);

impl Did {
    pub const fn new(bytes: [u8; DID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DID_LENGTH] {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Did {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| Error::validation(format!("invalid account id '{}': {}", s, e)))?;
        let bytes: [u8; DID_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::validation(format!(
                "invalid account id '{}': expected {} bytes, got {}",
                s,
                DID_LENGTH,
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Job identifier, unique within an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::validation(format!("invalid job id '{}': {}", s, e)))
    }
}

/// Overall job status, also used for per-task sub-status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Success,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// One entry of a job's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLog {
    pub task_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl JobLog {
    pub fn new(task_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Free-form value stored on a job for inter-step data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobValue {
    pub key: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

/// A tracked unit of work owned by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub did: Did,
    pub description: String,
    pub status: Status,
    #[serde(default)]
    pub task_status: HashMap<String, Status>,
    #[serde(default)]
    pub values: HashMap<String, JobValue>,
    #[serde(default)]
    pub logs: Vec<JobLog>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(did: Did, description: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            did,
            description: description.into(),
            status: Status::Pending,
            task_status: HashMap::new(),
            values: HashMap::new(),
            logs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Move the overall status out of `Pending`.
    pub fn transition(&mut self, to: Status) -> Result<()> {
        match (self.status, to) {
            (Status::Pending, Status::Success | Status::Failed) => {
                self.status = to;
                Ok(())
            }
            (from, to) => Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    /// Like [`Job::transition`], but only logs a refused transition.
    pub(crate) fn try_transition(&mut self, to: Status) {
        if let Err(e) = self.transition(to) {
            warn!(job_id = %self.id, account_id = %self.did, "Skipping status update: {}", e);
        }
    }

    pub fn add_log(&mut self, task_name: impl Into<String>, message: impl Into<String>) {
        self.logs.push(JobLog::new(task_name, message));
    }

    pub fn last_log(&self) -> Option<&JobLog> {
        self.logs.last()
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: Vec<u8>) {
        let key = key.into();
        self.values.insert(key.clone(), JobValue { key, value });
    }

    pub fn value(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).map(|v| v.value.as_slice())
    }

    /// Latest status snapshot, derived from the most recent log entry.
    pub fn status_response(&self) -> StatusResponse {
        let (message, last_updated) = match self.last_log() {
            Some(log) => (log.message.clone(), log.created_at),
            None => (String::new(), self.created_at),
        };
        StatusResponse {
            job_id: self.id,
            status: self.status,
            message,
            last_updated,
        }
    }
}

/// Status snapshot returned to callers polling a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job_id: JobId,
    pub status: Status,
    pub message: String,
    pub last_updated: DateTime<Utc>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
