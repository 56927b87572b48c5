//! Block-event counting.

use chrono::{DateTime, Utc};

use crate::types::AppPackage;

/// One record of the on-device blocker firing for an app. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
    pub app: AppPackage,
    pub observed_at: DateTime<Utc>,
}

/// Counts block events for `app` within `[window_start, window_end)`.
///
/// No deduplication: rapid repeats mean the blocker fired more than once,
/// which is a signal worth surfacing.
#[must_use]
pub fn count_blocks(
    events: &[BlockEvent],
    app: &AppPackage,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> u32 {
    u32::try_from(
        events
            .iter()
            .filter(|event| {
                event.app == *app
                    && event.observed_at >= window_start
                    && event.observed_at < window_end
            })
            .count(),
    )
    .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(app: &str, seconds: i64) -> BlockEvent {
        BlockEvent {
            app: AppPackage::try_from(app.to_string()).unwrap(),
            observed_at: Utc.timestamp_opt(seconds, 0).unwrap(),
        }
    }

    #[test]
    fn counts_only_matching_app_in_window() {
        let events = vec![
            event("com.example.app", 100),
            event("com.example.app", 101),
            event("com.other.app", 102),
            event("com.example.app", 500),
        ];
        let app = AppPackage::try_from("com.example.app".to_string()).unwrap();

        let count = count_blocks(
            &events,
            &app,
            Utc.timestamp_opt(100, 0).unwrap(),
            Utc.timestamp_opt(200, 0).unwrap(),
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn rapid_repeats_all_count() {
        let events = vec![
            event("com.example.app", 100),
            event("com.example.app", 100),
            event("com.example.app", 100),
        ];
        let app = AppPackage::try_from("com.example.app".to_string()).unwrap();

        let count = count_blocks(
            &events,
            &app,
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(200, 0).unwrap(),
        );
        assert_eq!(count, 3);
    }

    #[test]
    fn window_end_is_exclusive() {
        let events = vec![event("com.example.app", 200)];
        let app = AppPackage::try_from("com.example.app".to_string()).unwrap();

        let count = count_blocks(
            &events,
            &app,
            Utc.timestamp_opt(100, 0).unwrap(),
            Utc.timestamp_opt(200, 0).unwrap(),
        );
        assert_eq!(count, 0);
    }
}
