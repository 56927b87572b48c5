//! Foreground-usage aggregation.
//!
//! Devices re-report a running session every few seconds with an inflated
//! cumulative duration, so naive summing overcounts. The correction is
//! causal and streaming: a sample's contribution is capped by the gap since
//! the previous sample, because a session cannot extend backward in time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::types::AppPackage;

/// One observed foreground-app reading, immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSample {
    pub app: AppPackage,
    pub observed_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub screen_active: bool,
}

/// A sample after overlap correction.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupedSample {
    pub observed_at: DateTime<Utc>,
    /// Duration actually attributed, after capping by the gap since the
    /// previous sample.
    pub duration_ms: f64,
    /// Duration as reported by the device.
    pub raw_ms: f64,
    pub screen_active: bool,
    pub overlapped: bool,
}

/// Deduplicated usage sums for one app over one window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UsageTotals {
    pub on_screen_ms: f64,
    pub off_screen_ms: f64,
    pub duplicate_count: u32,
}

impl UsageTotals {
    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.on_screen_ms + self.off_screen_ms
    }
}

/// Applies the overlap correction to one app's samples.
///
/// The first sample keeps its reported duration. Each later sample is capped
/// at the elapsed time since the previous sample; a capped sample is marked
/// `overlapped`. Input order does not matter, samples are sorted by
/// `observed_at` first.
#[must_use]
pub fn dedup_samples(samples: &[UsageSample]) -> Vec<DedupedSample> {
    let mut ordered: Vec<&UsageSample> = samples.iter().collect();
    ordered.sort_by_key(|sample| sample.observed_at);

    let mut last_seen_at: Option<DateTime<Utc>> = None;
    let mut deduped = Vec::with_capacity(ordered.len());
    for sample in ordered {
        let mut duration = sample.duration_ms;
        let mut overlapped = false;
        if let Some(last) = last_seen_at {
            #[allow(clippy::cast_precision_loss)]
            let delta_ms = (sample.observed_at - last).num_milliseconds() as f64;
            if delta_ms < duration {
                duration = delta_ms;
                overlapped = true;
            }
        }
        last_seen_at = Some(sample.observed_at);
        deduped.push(DedupedSample {
            observed_at: sample.observed_at,
            duration_ms: duration,
            raw_ms: sample.duration_ms,
            screen_active: sample.screen_active,
            overlapped,
        });
    }
    deduped
}

/// Sums deduplicated on-screen and off-screen usage for one app within
/// `[window_start, window_end)`.
#[must_use]
pub fn aggregate(
    samples: &[UsageSample],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> UsageTotals {
    let windowed: Vec<UsageSample> = samples
        .iter()
        .filter(|sample| sample.observed_at >= window_start && sample.observed_at < window_end)
        .cloned()
        .collect();

    let mut totals = UsageTotals::default();
    for sample in dedup_samples(&windowed) {
        if sample.screen_active {
            totals.on_screen_ms += sample.duration_ms;
        } else {
            totals.off_screen_ms += sample.duration_ms;
        }
        if sample.overlapped {
            totals.duplicate_count += 1;
        }
    }
    totals
}

/// Groups mixed-app samples by app, preserving observation order per app.
#[must_use]
pub fn group_by_app(samples: Vec<UsageSample>) -> BTreeMap<AppPackage, Vec<UsageSample>> {
    let mut grouped: BTreeMap<AppPackage, Vec<UsageSample>> = BTreeMap::new();
    for sample in samples {
        grouped.entry(sample.app.clone()).or_default().push(sample);
    }
    grouped
}

/// Attributes deduplicated usage to the UTC minutes it occurred in.
///
/// Each sample covers `[observed_at - duration, observed_at]`; the walk runs
/// backward from the observation instant, splitting the duration across
/// minute boundaries. Keys are minute starts, values are milliseconds of
/// usage inside that minute.
#[must_use]
pub fn minutes_of_use(deduped: &[DedupedSample]) -> BTreeMap<DateTime<Utc>, i64> {
    let mut minutes: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
    for sample in deduped {
        #[allow(clippy::cast_possible_truncation)]
        let mut remaining = sample.duration_ms.round().max(0.0) as i64;
        let mut cursor = sample.observed_at.timestamp_millis();
        while remaining > 0 {
            let into_minute = cursor.rem_euclid(60_000);
            let available = if into_minute == 0 { 60_000 } else { into_minute };
            let take = remaining.min(available);
            let bucket_ms = cursor - if into_minute == 0 { 60_000 } else { into_minute };
            if let Some(bucket) = DateTime::from_timestamp_millis(bucket_ms) {
                *minutes.entry(bucket).or_default() += take;
            }
            cursor -= take;
            remaining -= take;
        }
    }
    minutes
}
