//! Outbox job rows.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use parley_core::{FailedJobId, JobId};
use serde::{Deserialize, Serialize};

/// An active outbox row.
///
/// Eligible for reservation once `available_at <= now` and any previous lease
/// (`reserved_until`) has expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    /// Registry key of the handler.
    pub name: String,
    /// Handler-private encoding.
    pub payload: String,
    /// Reservations so far, including the current one.
    pub attempts: u32,
    pub available_at: DateTime<Utc>,
    pub reserved_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        payload: impl Into<String>,
        available_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            payload: payload.into(),
            attempts: 0,
            available_at,
            reserved_until: available_at,
            created_at: now,
        }
    }

    /// Whether a worker may reserve this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.available_at <= now && self.reserved_until <= now
    }

    /// Take the lease until `until` and count the attempt.
    pub fn reserve(&mut self, until: DateTime<Utc>) {
        self.reserved_until = until;
        self.attempts += 1;
    }
}

/// Why a job was moved to the dead-letter table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// No handler is registered under the job's name.
    NotFound,
    /// The handler failed on its last allowed attempt.
    TooManyErrors,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::NotFound => "not_found",
            FailReason::TooManyErrors => "too_many_errors",
        }
    }
}

impl core::fmt::Display for FailReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(FailReason::NotFound),
            "too_many_errors" => Ok(FailReason::TooManyErrors),
            other => Err(format!("unknown fail reason: {other}")),
        }
    }
}

/// Immutable dead-letter record, kept for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    pub id: FailedJobId,
    pub name: String,
    pub payload: String,
    pub reason: FailReason,
    pub created_at: DateTime<Utc>,
}

impl FailedJob {
    pub fn new(name: impl Into<String>, payload: impl Into<String>, reason: FailReason) -> Self {
        Self {
            id: FailedJobId::new(),
            name: name.into(),
            payload: payload.into(),
            reason,
            created_at: Utc::now(),
        }
    }
}
