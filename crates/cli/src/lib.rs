//! Plain-text rendering shared by the `syncctl` subcommands. Styling is
//! applied in `main.rs`; everything here is testable without a terminal.

use chrono::{DateTime, Utc};
use service::{JobReport, RunOutcome, StatusSnapshot};
use sync_engine::SyncOutcome;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Label/value pairs describing a finished run.
pub fn report_lines(report: &JobReport) -> Vec<(&'static str, String)> {
    match report {
        JobReport::Sync(r) => {
            let outcome = match r.outcome {
                SyncOutcome::NoNewDocuments => "no new documents",
                SyncOutcome::Synced => "synced",
            };
            vec![
                ("outcome", outcome.to_string()),
                ("window start", r.window_start.to_string()),
                ("in window", r.in_window.to_string()),
                ("retrieved", r.retrieved.to_string()),
                ("stored", r.stored.to_string()),
                ("indexed", r.indexed.to_string()),
                ("annotated", r.annotated.to_string()),
                ("remote index", yes_no(r.remote_index_available).into()),
            ]
        }
        JobReport::Resync(r) => vec![
            ("vectorizers retrained", yes_no(r.vectorizers_retrained).into()),
            ("remote indexed", r.remote_indexed.to_string()),
            ("local index removed", yes_no(r.local_index_removed).into()),
            ("local cleared", yes_no(r.local_cleared).into()),
        ],
    }
}

/// One summary line per job, sorted by job name.
pub fn status_lines(snapshot: &StatusSnapshot, now: DateTime<Utc>) -> Vec<String> {
    snapshot
        .jobs
        .iter()
        .map(|(job, status)| {
            let age = humanize_age((now - status.finished_at).num_seconds());
            let mut line = format!("{job:<18} {:<10} {age}", status.outcome.as_str());
            if status.outcome.is_failure() || status.outcome == RunOutcome::Skipped {
                if let Some(err) = &status.error {
                    line.push_str(&format!("  [{err}]"));
                }
                if status.consecutive_failures > 1 {
                    line.push_str(&format!("  ({} failures in a row)", status.consecutive_failures));
                }
            }
            line
        })
        .collect()
}

pub fn humanize_age(secs: i64) -> String {
    match secs {
        s if s < 0 => "in the future".into(),
        s if s < 60 => format!("{s}s ago"),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}

const fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use service::JobStatus;
    use sync_engine::ResyncReport;

    #[test]
    fn ages_pick_the_largest_unit() {
        assert_eq!(humanize_age(5), "5s ago");
        assert_eq!(humanize_age(125), "2m ago");
        assert_eq!(humanize_age(7_200), "2h ago");
        assert_eq!(humanize_age(200_000), "2d ago");
        assert_eq!(humanize_age(-1), "in the future");
    }

    #[test]
    fn resync_report_lists_every_step() {
        let lines = report_lines(&JobReport::Resync(ResyncReport {
            vectorizers_retrained: false,
            remote_indexed: 12,
            local_index_removed: true,
            local_cleared: true,
        }));
        assert_eq!(lines[0], ("vectorizers retrained", "no".to_string()));
        assert_eq!(lines[1].1, "12");
    }

    #[test]
    fn failed_jobs_show_error_and_streak() {
        let now = Utc::now();
        let mut snapshot = StatusSnapshot::default();
        snapshot.jobs.insert(
            "incremental_sync".into(),
            JobStatus {
                run_id: "x".into(),
                started_at: now - Duration::seconds(90),
                finished_at: now - Duration::seconds(61),
                outcome: RunOutcome::Failed,
                report: None,
                error_kind: Some("artifacts_missing".into()),
                error: Some("trained artifact missing at cand.bin".into()),
                consecutive_failures: 3,
            },
        );
        let lines = status_lines(&snapshot, now);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("incremental_sync"));
        assert!(lines[0].contains("failed"));
        assert!(lines[0].contains("1m ago"));
        assert!(lines[0].contains("[trained artifact missing at cand.bin]"));
        assert!(lines[0].contains("(3 failures in a row)"));
    }
}
