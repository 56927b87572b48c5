//! Outcome tallies for audit reporting.
//!
//! Accumulators are explicit values: a run constructs fresh ones, workers
//! fill partial summaries independently, and partials combine with an
//! associative merge so reduction order never changes the result.

use std::collections::BTreeMap;

use crate::outcome::{Classification, Outcome};

/// Per-group outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub no_block_ok: u64,
    pub block_ok: u64,
    pub extra_block: u64,
    pub missing_block: u64,
    pub extra_block_when_disabled: u64,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::NoBlockOk => self.no_block_ok += 1,
            Outcome::BlockOk => self.block_ok += 1,
            Outcome::ExtraBlock => self.extra_block += 1,
            Outcome::MissingBlock => self.missing_block += 1,
            Outcome::ExtraBlockWhenDisabled => self.extra_block_when_disabled += 1,
        }
    }

    #[must_use]
    pub const fn count(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::NoBlockOk => self.no_block_ok,
            Outcome::BlockOk => self.block_ok,
            Outcome::ExtraBlock => self.extra_block,
            Outcome::MissingBlock => self.missing_block,
            Outcome::ExtraBlockWhenDisabled => self.extra_block_when_disabled,
        }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.no_block_ok
            + self.block_ok
            + self.extra_block
            + self.missing_block
            + self.extra_block_when_disabled
    }

    #[must_use]
    pub const fn successful(&self) -> u64 {
        self.no_block_ok + self.block_ok
    }

    fn merge(&mut self, other: Self) {
        self.no_block_ok += other.no_block_ok;
        self.block_ok += other.block_ok;
        self.extra_block += other.extra_block;
        self.missing_block += other.missing_block;
        self.extra_block_when_disabled += other.extra_block_when_disabled;
    }
}

/// Grouping keys for one classified unit. Fields decoded from the client's
/// user agent may be unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryDimensions {
    pub platform: Option<String>,
    pub device_model: Option<String>,
    pub version: Option<String>,
    pub source: String,
    pub app: String,
}

impl From<&Classification> for SummaryDimensions {
    fn from(unit: &Classification) -> Self {
        Self {
            platform: unit.client.platform.clone(),
            device_model: unit.client.device_model.clone(),
            version: unit.client.version.clone(),
            source: unit.source.to_string(),
            app: unit.app.to_string(),
        }
    }
}

fn known(value: Option<&String>) -> String {
    value.cloned().unwrap_or_else(|| "unknown".to_string())
}

/// Outcome counts sliced by every audit dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    pub by_platform: BTreeMap<String, OutcomeCounts>,
    pub by_model: BTreeMap<String, OutcomeCounts>,
    pub by_version: BTreeMap<String, OutcomeCounts>,
    pub by_source: BTreeMap<String, OutcomeCounts>,
    pub by_app: BTreeMap<String, OutcomeCounts>,
    pub by_model_platform: BTreeMap<(String, String), OutcomeCounts>,
    pub by_source_app: BTreeMap<(String, String), OutcomeCounts>,
}

impl OutcomeSummary {
    pub fn record(&mut self, dimensions: &SummaryDimensions, outcome: Outcome) {
        let platform = known(dimensions.platform.as_ref());
        let model = known(dimensions.device_model.as_ref());
        let version = known(dimensions.version.as_ref());

        self.by_platform
            .entry(platform.clone())
            .or_default()
            .record(outcome);
        self.by_model
            .entry(model.clone())
            .or_default()
            .record(outcome);
        self.by_version.entry(version).or_default().record(outcome);
        self.by_source
            .entry(dimensions.source.clone())
            .or_default()
            .record(outcome);
        self.by_app
            .entry(dimensions.app.clone())
            .or_default()
            .record(outcome);
        self.by_model_platform
            .entry((model, platform))
            .or_default()
            .record(outcome);
        self.by_source_app
            .entry((dimensions.source.clone(), dimensions.app.clone()))
            .or_default()
            .record(outcome);
    }

    /// Associative, commutative combination of two partial summaries.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        fn merge_into<K: Ord>(
            target: &mut BTreeMap<K, OutcomeCounts>,
            source: BTreeMap<K, OutcomeCounts>,
        ) {
            for (key, counts) in source {
                target.entry(key).or_default().merge(counts);
            }
        }

        merge_into(&mut self.by_platform, other.by_platform);
        merge_into(&mut self.by_model, other.by_model);
        merge_into(&mut self.by_version, other.by_version);
        merge_into(&mut self.by_source, other.by_source);
        merge_into(&mut self.by_app, other.by_app);
        merge_into(&mut self.by_model_platform, other.by_model_platform);
        merge_into(&mut self.by_source_app, other.by_source_app);
        self
    }

    /// Units recorded, counting each once.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.by_source.values().map(OutcomeCounts::total).sum()
    }

    /// Units with a correct intervention outcome, counting each once.
    #[must_use]
    pub fn successful(&self) -> u64 {
        self.by_source.values().map(OutcomeCounts::successful).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}
