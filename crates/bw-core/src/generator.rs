//! Generator kinds as the single source of truth for telemetry category strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Telemetry generator kinds consumed by the reconciliation engine.
///
/// Devices emit many more generators than these; the engine only ever queries
/// the ones listed here. Unknown generator strings are stored untouched and
/// simply never match a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generator {
    /// Per-app foreground usage samples.
    ForegroundApplication,
    /// Versioned budget schedule snapshots (full history per point).
    FullAppBudgets,
    /// Flat daily budget snapshots.
    DailyAppBudgets,
    /// App events (blocks, snoozes, warnings), keyed by a secondary identifier.
    AppEvent,
}

/// Secondary identifier carried by block events within [`Generator::AppEvent`].
pub const BLOCKED_APP_EVENT: &str = "blocked_app";

impl Generator {
    /// Wire identifier of this generator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ForegroundApplication => "pdk-foreground-application",
            Self::FullAppBudgets => "full-app-budgets",
            Self::DailyAppBudgets => "app-budgets",
            Self::AppEvent => "pdk-app-event",
        }
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Generator {
    type Err = UnknownGenerator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdk-foreground-application" => Ok(Self::ForegroundApplication),
            "full-app-budgets" => Ok(Self::FullAppBudgets),
            "app-budgets" => Ok(Self::DailyAppBudgets),
            "pdk-app-event" => Ok(Self::AppEvent),
            _ => Err(UnknownGenerator(s.to_string())),
        }
    }
}

impl Serialize for Generator {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Generator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown generator strings.
#[derive(Debug, Clone)]
pub struct UnknownGenerator(String);

impl fmt::Display for UnknownGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown generator: {}", self.0)
    }
}

impl std::error::Error for UnknownGenerator {}
