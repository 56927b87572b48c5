//! Treatment phases and blocker configuration.
//!
//! A participant moves through dated phases (baseline, treatment, washout...).
//! The phase governing a calendar day is the latest phase whose `start_date`
//! is on or before that day; a phase ends where the next one starts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::ParticipantId;

/// Blocker behavior configured for a treatment phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockerType {
    /// No blocker installed (baseline phases).
    #[default]
    None,
    /// Blocks can be snoozed at no cost.
    FreeSnooze,
    /// Snoozing costs part of the participant's subsidy.
    CostlySnooze,
    /// Snooze cost is participant-configurable.
    FlexibleSnooze,
    /// Blocks cannot be snoozed.
    NoSnooze,
}

impl BlockerType {
    /// Canonical string representation for storage and tags.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FreeSnooze => "free_snooze",
            Self::CostlySnooze => "costly_snooze",
            Self::FlexibleSnooze => "flexible_snooze",
            Self::NoSnooze => "no_snooze",
        }
    }
}

impl fmt::Display for BlockerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BlockerType {
    type Err = UnknownBlockerType;

    /// Case-insensitive: researcher uploads use mixed casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "free_snooze" => Ok(Self::FreeSnooze),
            "costly_snooze" => Ok(Self::CostlySnooze),
            "flexible_snooze" => Ok(Self::FlexibleSnooze),
            "no_snooze" => Ok(Self::NoSnooze),
            _ => Err(UnknownBlockerType(s.to_string())),
        }
    }
}

impl Serialize for BlockerType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlockerType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown blocker type: {0}")]
pub struct UnknownBlockerType(String);

/// One dated configuration window for a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentPhase {
    pub participant_id: ParticipantId,
    pub start_date: NaiveDate,
    pub blocker_type: BlockerType,
    pub treatment_active: bool,
    pub receives_subsidy: bool,
    pub snooze_delay: i64,
}

impl TreatmentPhase {
    /// Whether the blocker intervention is supposed to fire during this phase.
    #[must_use]
    pub fn blocker_active(&self) -> bool {
        self.treatment_active && self.blocker_type != BlockerType::None
    }
}

/// Selects the phase governing `day`: the latest phase with `start_date <= day`.
///
/// Returns `None` when `day` precedes every phase (participant not yet
/// enrolled on that day).
pub fn governing_phase(phases: &[TreatmentPhase], day: NaiveDate) -> Option<&TreatmentPhase> {
    phases
        .iter()
        .filter(|phase| phase.start_date <= day)
        .max_by_key(|phase| phase.start_date)
}
