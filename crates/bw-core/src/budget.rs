//! Budget-schedule decoding and resolution.
//!
//! Devices transmit their full budget history as a `budgets` array inside a
//! versioned snapshot point. Each entry carries an `effective_on` epoch-ms
//! instant and a `budget` field holding the per-app limit map as a nested
//! JSON string (a quirk of the device serializer, preserved on the wire).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("budget history is not valid JSON")]
    History(#[source] serde_json::Error),
    #[error("budget limits effective at {effective_on} are not a valid JSON map")]
    Limits {
        effective_on: i64,
        #[source]
        source: serde_json::Error,
    },
}

/// One versioned budget record: the per-app limit map in force from
/// `effective_on` onward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub observed_at: DateTime<Utc>,
    pub effective_on: i64,
    pub limits: HashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
struct BudgetHistory {
    budgets: Vec<RawSnapshot>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    effective_on: i64,
    budget: String,
}

/// Decodes the `budgets` array out of a versioned budget point's properties.
pub fn decode_history(
    properties: &str,
    observed_at: DateTime<Utc>,
) -> Result<Vec<BudgetSnapshot>, BudgetError> {
    let history: BudgetHistory =
        serde_json::from_str(properties).map_err(BudgetError::History)?;

    let mut snapshots = Vec::with_capacity(history.budgets.len());
    for raw in history.budgets {
        let limits: HashMap<String, i64> =
            serde_json::from_str(&raw.budget).map_err(|source| BudgetError::Limits {
                effective_on: raw.effective_on,
                source,
            })?;
        snapshots.push(BudgetSnapshot {
            observed_at,
            effective_on: raw.effective_on,
            limits,
        });
    }
    Ok(snapshots)
}

/// Selects the snapshot in force at `at_epoch_ms`: the most recent
/// `effective_on <= at_epoch_ms`, ties broken by `observed_at` descending.
/// `None` means no budget is in effect and the caller must treat every app
/// as unlimited, not as zero-limit.
#[must_use]
pub fn resolve(snapshots: &[BudgetSnapshot], at_epoch_ms: i64) -> Option<&BudgetSnapshot> {
    let mut ordered: Vec<&BudgetSnapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| {
        b.effective_on
            .cmp(&a.effective_on)
            .then(b.observed_at.cmp(&a.observed_at))
    });
    ordered
        .into_iter()
        .find(|snapshot| snapshot.effective_on <= at_epoch_ms)
}

/// Looks up one app's limit. Absent or negative entries mean no limit is set
/// for that app.
#[must_use]
pub fn app_limit(limits: &HashMap<String, i64>, app: &str) -> Option<i64> {
    limits.get(app).copied().filter(|limit| *limit >= 0)
}
