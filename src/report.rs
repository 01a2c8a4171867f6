use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::alert::{Alert, AlertSink};
use crate::models::Status;
use crate::state::StateStore;

/// Periodically summarizes endpoints that are currently down and hands the
/// summary to the configured alert sinks.
pub struct Reporter {
    interval: Duration,
    last_report_time: DateTime<Utc>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl Reporter {
    pub fn new(interval_secs: u64, sinks: Vec<Arc<dyn AlertSink>>, now: DateTime<Utc>) -> Self {
        Self {
            interval: Duration::seconds(interval_secs as i64),
            last_report_time: now,
            sinks,
        }
    }

    /// Checks the report cadence and fires a report when due. The cadence
    /// advances whether or not anything was down; a silent interval means
    /// no action was needed, not that the check should rerun sooner.
    /// Returns whether the cadence fired.
    pub async fn maybe_report(&mut self, now: DateTime<Utc>, store: &StateStore) -> bool {
        if now - self.last_report_time < self.interval {
            return false;
        }
        self.last_report_time = now;

        let mut lines = Vec::new();
        for (label, state) in store.snapshot().await {
            if state.status != Status::Failed {
                continue;
            }
            // A Failed slot always carries `since`: the store stamps it on
            // every transition out of Unknown.
            if let Some(since) = state.since {
                let duration = format_duration((now - since).num_seconds());
                lines.push(format!(
                    "- {}: unavailable since {} (duration: {})",
                    label,
                    since.format("%Y-%m-%d %H:%M:%S"),
                    duration
                ));
            }
        }

        if lines.is_empty() {
            info!("All monitored endpoints are available. Report not required.");
            return true;
        }

        info!("{} endpoint(s) unavailable. Sending report...", lines.len());
        let alert = build_alert(now, &lines);
        for sink in &self.sinks {
            if let Err(e) = sink.notify(&alert).await {
                error!("Alert sink '{}' failed: {:#}", sink.name(), e);
            }
        }
        true
    }
}

fn build_alert(now: DateTime<Utc>, lines: &[String]) -> Alert {
    let listing = lines.join("\n");
    Alert {
        subject: format!(
            "SIP Monitor Report: Unavailable endpoints ({})",
            now.format("%Y-%m-%d %H:%M")
        ),
        body: format!(
            "The following SIP endpoints are currently unavailable:\n\n{}\n\nThe monitor continues to run.",
            listing
        ),
        message: format!("SIP Monitor: Unavailable endpoints:\n{}", listing),
    }
}

/// Renders a downtime duration as HH:MM:SS with unbounded hours, so outages
/// longer than a day show hour counts of 24 and above.
pub fn format_duration(total_secs: i64) -> String {
    let secs = total_secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
