//! Federated study server integration.
//!
//! Participants enrolled through a peer study site keep their telemetry on
//! that site's server. The only surface a peer exposes is a
//! performance-report endpoint, authenticated by a shared request key.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default request timeout; peer servers assemble reports on demand and can
/// be slow.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A report older than this many seconds means the participant's app has
/// stopped uploading.
const STALE_AFTER_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Federated client errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The configured request key was invalid.
    #[error("invalid request key: {reason}")]
    InvalidRequestKey { reason: &'static str },
    /// The configured endpoint URL was invalid.
    #[error("invalid endpoint URL: {reason}")]
    InvalidUrl { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Peer returned a non-success status.
    #[error("peer returned status {status}")]
    Server { status: u16, body: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Peer answered without a performance report, usually an unknown
    /// participant identifier.
    #[error("response contained no performance report")]
    MissingReport,
}

/// Client for one federated study server.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    request_key: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("request_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new client for a peer's performance-report endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an HTTP(S) URL, the request
    /// key is empty or whitespace-only, or the HTTP client fails to build.
    pub fn new(
        endpoint: impl Into<String>,
        request_key: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let endpoint = endpoint.into();
        let request_key = request_key.into();

        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(RemoteError::InvalidUrl {
                reason: "endpoint must be an http(s) URL",
            });
        }
        if request_key.is_empty() {
            return Err(RemoteError::InvalidRequestKey {
                reason: "request key cannot be empty",
            });
        }
        if request_key.trim().is_empty() {
            return Err(RemoteError::InvalidRequestKey {
                reason: "request key cannot be whitespace-only",
            });
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(RemoteError::ClientBuild)?;

        Ok(Self {
            http,
            endpoint,
            request_key,
        })
    }

    /// Fetches a participant's performance report from the peer.
    pub async fn performance_report(
        &self,
        identifier: &str,
    ) -> Result<PerformanceReport, RemoteError> {
        let response = self
            .http
            .post(&self.endpoint)
            .form(&[
                ("identifier", identifier),
                ("request-key", &self.request_key),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Server {
                status: status.as_u16(),
                body,
            });
        }
        parse_report(&body)
    }
}

/// Data-quality summary a study server keeps per participant.
///
/// Peers running older versions omit fields; everything is optional except
/// the issue list, which defaults to empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PerformanceReport {
    pub group: Option<String>,
    pub latest_point: Option<String>,
    pub latest_ago: Option<f64>,
    pub today_observed_count: Option<i64>,
    pub yesterday_observed_count: Option<i64>,
    pub today_observed_fraction: Option<f64>,
    pub app_version: Option<String>,
    pub platform_version: Option<String>,
    pub device_model: Option<String>,
    pub phase_type: Option<String>,
    pub phase_start: Option<String>,
    pub phase_budget: Option<HashMap<String, i64>>,
    pub phase_snoozes: Option<i64>,
    #[serde(default)]
    pub phase_misc_issues: Vec<String>,
}

impl PerformanceReport {
    /// Whether the participant's app has stopped uploading.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.latest_ago.is_some_and(|ago| ago > STALE_AFTER_SECS)
    }
}

fn parse_report(body: &str) -> Result<PerformanceReport, RemoteError> {
    #[derive(Deserialize)]
    struct Envelope {
        study_performance_report: Option<PerformanceReport>,
    }

    let envelope: Envelope =
        serde_json::from_str(body).map_err(|err| RemoteError::InvalidResponse(err.to_string()))?;
    envelope
        .study_performance_report
        .ok_or(RemoteError::MissingReport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_rejects_empty_request_key() {
        assert!(matches!(
            Client::new("https://peer.example.edu/quality", ""),
            Err(RemoteError::InvalidRequestKey { .. })
        ));
    }

    #[test]
    fn client_rejects_whitespace_request_key() {
        assert!(matches!(
            Client::new("https://peer.example.edu/quality", "   "),
            Err(RemoteError::InvalidRequestKey { .. })
        ));
    }

    #[test]
    fn client_rejects_non_http_endpoint() {
        assert!(matches!(
            Client::new("peer.example.edu/quality", "key"),
            Err(RemoteError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn client_accepts_valid_configuration() {
        assert!(Client::new("https://peer.example.edu/quality", "shared-key").is_ok());
    }

    #[test]
    fn client_debug_redacts_request_key() {
        let client = Client::new("https://peer.example.edu/quality", "shared-key").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("shared-key"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("peer.example.edu"));
    }

    #[tokio::test]
    async fn performance_report_surfaces_transport_errors() {
        // Nothing listens on the discard port.
        let client = Client::new("http://127.0.0.1:9", "shared-key").unwrap();
        let err = client.performance_report("participant.1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Request(_)));
    }

    #[test]
    fn parse_report_reads_envelope() {
        let body = r#"{
            "study_performance_report": {
                "group": "Site B",
                "latest_point": "2025-03-10T09:58:00-05:00",
                "latest_ago": 120.5,
                "today_observed_count": 310,
                "yesterday_observed_count": 290,
                "today_observed_fraction": 1.07,
                "app_version": "Phone Dashboard/34",
                "platform_version": "Android 8.0.0 SDK 26",
                "device_model": "samsung SM-J737U",
                "phase_type": "free_snooze",
                "phase_start": "2025-02-01",
                "phase_budget": {"com.example.app": 60000},
                "phase_snoozes": 2,
                "phase_misc_issues": ["Recorded 2 snooze(s) without corresponding limits being set."]
            }
        }"#;
        let report = parse_report(body).unwrap();
        assert_eq!(report.group.as_deref(), Some("Site B"));
        assert_eq!(report.latest_ago, Some(120.5));
        assert_eq!(report.phase_budget.as_ref().unwrap()["com.example.app"], 60_000);
        assert_eq!(report.phase_misc_issues.len(), 1);
        assert!(!report.is_stale());
    }

    #[test]
    fn parse_report_tolerates_sparse_fields() {
        let body = r#"{"study_performance_report": {"latest_ago": 172800.0}}"#;
        let report = parse_report(body).unwrap();
        assert_eq!(report.group, None);
        assert!(report.phase_misc_issues.is_empty());
        assert!(report.is_stale());
    }

    #[test]
    fn parse_report_flags_missing_report() {
        let err = parse_report(r#"{"message": "no such participant"}"#).unwrap_err();
        assert!(matches!(err, RemoteError::MissingReport));
    }

    #[test]
    fn parse_report_rejects_invalid_json() {
        let err = parse_report("not-json").unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }
}
