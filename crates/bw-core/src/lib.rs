//! Core domain logic for the blocker audit engine.
//!
//! This crate contains the fundamental types and logic for:
//! - Usage aggregation: deduplicating overlapping foreground samples
//! - Budget resolution: selecting the effective per-app limit map
//! - Outcome classification: auditing whether the blocker fired correctly
//! - Reconciliation: evaluating one (source, date) unit end to end

pub mod blocks;
pub mod budget;
pub mod day;
pub mod generator;
pub mod outcome;
pub mod phase;
pub mod reconcile;
pub mod summary;
pub mod types;
pub mod usage;
pub mod user_agent;

pub use blocks::{BlockEvent, count_blocks};
pub use budget::{BudgetError, BudgetSnapshot, app_limit, decode_history, resolve};
pub use day::{day_start_epoch_ms, day_window, device_timezone, parse_zone};
pub use generator::{BLOCKED_APP_EVENT, Generator, UnknownGenerator};
pub use outcome::{Classification, Outcome, UnknownOutcomeTag, classify};
pub use phase::{BlockerType, TreatmentPhase, UnknownBlockerType, governing_phase};
pub use reconcile::{BudgetPoint, UnitInput, UnitSkip, evaluate_unit, resolve_zone};
pub use summary::{OutcomeCounts, OutcomeSummary, SummaryDimensions};
pub use types::{AppPackage, ParticipantId, SourceId, ValidationError};
pub use usage::{
    DedupedSample, UsageSample, UsageTotals, aggregate, dedup_samples, group_by_app,
    minutes_of_use,
};
pub use user_agent::ClientInfo;
