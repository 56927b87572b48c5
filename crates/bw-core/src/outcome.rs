//! Outcome classification for blocker audits.
//!
//! The classifier cross-checks two independent signals, usage versus limit
//! and whether a block fired, against whether the blocker mechanism was
//! supposed to be active that day.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

use crate::phase::BlockerType;
use crate::types::{AppPackage, SourceId};
use crate::user_agent::ClientInfo;

/// Audit category for one (source, app, day) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    NoBlockOk,
    BlockOk,
    ExtraBlock,
    MissingBlock,
    ExtraBlockWhenDisabled,
}

#[derive(Debug, Error)]
#[error("unknown outcome tag: {0}")]
pub struct UnknownOutcomeTag(String);

impl Outcome {
    pub const ALL: [Self; 5] = [
        Self::NoBlockOk,
        Self::BlockOk,
        Self::ExtraBlock,
        Self::MissingBlock,
        Self::ExtraBlockWhenDisabled,
    ];

    /// Issue tag vocabulary, stable across the study.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::NoBlockOk => "pd-nonblock-ok",
            Self::BlockOk => "pd-block-ok",
            Self::ExtraBlock => "pd-extra-block",
            Self::MissingBlock => "pd-missing-block",
            Self::ExtraBlockWhenDisabled => "pd-extra-block-when-disabled",
        }
    }

    #[must_use]
    pub const fn verdict(self) -> &'static str {
        match self {
            Self::NoBlockOk => "non-block ok",
            Self::BlockOk => "block ok",
            Self::ExtraBlock => "unnecessary block",
            Self::MissingBlock => "missing block",
            Self::ExtraBlockWhenDisabled => "blocked while disabled",
        }
    }

    /// Report-line marker: blank for correct behavior, `!` for a block that
    /// should not have happened, `X` for a block that failed to happen.
    #[must_use]
    pub const fn marker(self) -> char {
        match self {
            Self::NoBlockOk | Self::BlockOk => ' ',
            Self::ExtraBlock | Self::ExtraBlockWhenDisabled => '!',
            Self::MissingBlock => 'X',
        }
    }

    /// Whether the intervention behaved correctly.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::NoBlockOk | Self::BlockOk)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Outcome {
    type Err = UnknownOutcomeTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|outcome| outcome.tag() == s)
            .ok_or_else(|| UnknownOutcomeTag(s.to_string()))
    }
}

/// Classifies one evaluated (source, app, day).
///
/// Returns `None` when no evaluation applies: no limit is known for the app,
/// or the blocker was disabled and correctly did nothing.
#[must_use]
pub fn classify(
    on_screen_ms: f64,
    limit_ms: i64,
    block_count: u32,
    blocker_active: bool,
) -> Option<Outcome> {
    if limit_ms < 0 {
        return None;
    }
    if !blocker_active {
        if block_count > 0 {
            return Some(Outcome::ExtraBlockWhenDisabled);
        }
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let under_limit = on_screen_ms < limit_ms as f64;
    let outcome = match (under_limit, block_count > 0) {
        (true, true) => Outcome::ExtraBlock,
        (true, false) => Outcome::NoBlockOk,
        (false, true) => Outcome::BlockOk,
        (false, false) => Outcome::MissingBlock,
    };
    Some(outcome)
}

/// One classified unit, carrying everything needed to report it or
/// materialize an issue record from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub source: SourceId,
    pub app: AppPackage,
    pub date: NaiveDate,
    pub outcome: Outcome,
    pub on_screen_ms: f64,
    pub limit_ms: i64,
    pub block_count: u32,
    pub duplicate_count: u32,
    /// Governing phase's blocker type, when the blocker was active.
    pub blocker_type: Option<BlockerType>,
    pub user_agent: Option<String>,
    pub client: ClientInfo,
}

impl Classification {
    fn comparison(&self) -> char {
        #[allow(clippy::cast_precision_loss)]
        if self.on_screen_ms < self.limit_ms as f64 {
            '<'
        } else {
            '>'
        }
    }

    /// One stdout line in report mode.
    #[must_use]
    pub fn report_line(&self) -> String {
        format!(
            " [{}] {}[{}] {}: {:.0} {} {} ({} / {} overlapping usages)",
            self.outcome.marker(),
            self.source,
            self.app,
            self.outcome.verdict(),
            self.on_screen_ms,
            self.comparison(),
            self.limit_ms,
            self.user_agent.as_deref().unwrap_or("unknown client"),
            self.duplicate_count,
        )
    }

    /// Issue tags: `<app> pd-blocks <outcome-tag>`, plus the blocker type
    /// when one was in force.
    #[must_use]
    pub fn tags(&self) -> String {
        let mut tags = format!("{} pd-blocks {}", self.app, self.outcome.tag());
        if let Some(blocker_type) = self.blocker_type {
            tags.push_str(" pd-blocker");
            tags.push_str(blocker_type.as_str());
        }
        tags
    }

    /// Issue description, same shape for every outcome.
    #[must_use]
    pub fn description(&self) -> String {
        format!(
            "{} {}: {:.0} {} {} ({} overlapping usages)",
            self.app,
            self.outcome.verdict(),
            self.on_screen_ms,
            self.comparison(),
            self.limit_ms,
            self.duplicate_count,
        )
    }
}
