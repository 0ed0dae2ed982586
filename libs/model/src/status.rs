//! Instance lifecycle status.
//!
//! Statuses split into two classes that drive reconciliation:
//!
//! - **Permanent**: `Running`, `Stopped` — settled states. Only a permanent
//!   observation may overwrite tracked state.
//! - **Transitional**: `ScheduledToStart`, `Starting`, `Stopping`,
//!   `ScheduledToStop` — in-flight states that are expected to settle on
//!   their own and are shielded from short-lived inconsistent snapshots.
//!
//! `Unknown` and `Error` belong to neither class.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing an [`InstanceStatus`] from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown instance status: {0}")]
pub struct ParseStatusError(String);

/// Lifecycle status of a tracked cloud instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Status has not been determined yet.
    Unknown,
    /// A start was requested but the provider has not picked it up.
    ScheduledToStart,
    /// The provider is bringing the instance up.
    Starting,
    /// The instance is up.
    Running,
    /// The provider is bringing the instance down.
    Stopping,
    /// The instance is down.
    Stopped,
    /// A stop was requested but the provider has not picked it up.
    ScheduledToStop,
    /// The instance is in a provider-reported error state.
    Error,
}

impl InstanceStatus {
    /// Returns true for settled states.
    ///
    /// Only a permanent observed status is allowed to overwrite tracked
    /// state during reconciliation.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }

    /// Returns true for in-flight lifecycle states.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::ScheduledToStart | Self::Starting | Self::Stopping | Self::ScheduledToStop
        )
    }

    /// Returns true for states an instance holds before the provider has
    /// materialized it.
    ///
    /// Instances in this set may legitimately be missing from the observed
    /// world and must survive reconciliation untouched.
    pub fn in_startup_grace(&self) -> bool {
        matches!(self, Self::ScheduledToStart | Self::Starting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::ScheduledToStart => "scheduled_to_start",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ScheduledToStop => "scheduled_to_stop",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "scheduled_to_start" => Ok(Self::ScheduledToStart),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "scheduled_to_stop" => Ok(Self::ScheduledToStop),
            "error" => Ok(Self::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}
