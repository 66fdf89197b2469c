//! Plain-text connectivity report.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::db::{hours_before, DbError, Outage, Store, TargetStats};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("failed to format report: {0}")]
    Format(#[from] fmt::Error),
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Render the summary for the `hours` preceding `now`.
pub fn render_text_report(
    store: &Store,
    hours: i64,
    now: DateTime<Utc>,
) -> Result<String, ReportError> {
    let since = hours_before(now, hours);
    let stats = store.stats_since(since)?;
    let outages = store.outages_simple_since(since)?;

    let mut out = String::new();
    write_report(&mut out, hours, now, &stats, &outages)?;
    Ok(out)
}

fn write_report(
    out: &mut impl Write,
    hours: i64,
    now: DateTime<Utc>,
    stats: &[TargetStats],
    outages: &[Outage],
) -> fmt::Result {
    let rule = "=".repeat(60);

    writeln!(out, "Network Connectivity Report")?;
    writeln!(out, "Generated: {}", now.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out, "Period: Last {} hours\n", hours)?;
    writeln!(out, "{}", rule)?;

    writeln!(out, "\nOVERALL STATISTICS")?;
    for s in stats {
        let uptime = if s.total_pings > 0 {
            s.successful_pings as f64 / s.total_pings as f64 * 100.0
        } else {
            0.0
        };
        writeln!(out, "Target: {}", s.target)?;
        writeln!(out, "  Total Pings: {}", s.total_pings)?;
        writeln!(out, "  Successful: {} ({:.2}%)", s.successful_pings, uptime)?;
        writeln!(out, "  Packet Loss: {:.2}%", s.packet_loss)?;
        if let (Some(avg), Some(min), Some(max)) = (s.avg_rtt, s.min_rtt, s.max_rtt) {
            writeln!(out, "  Average RTT: {:.2} ms", avg)?;
            writeln!(out, "  Min RTT: {:.2} ms", min)?;
            writeln!(out, "  Max RTT: {:.2} ms", max)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "{}", rule)?;
    writeln!(out, "\nOUTAGE PERIODS (3+ consecutive failures)")?;
    for (i, outage) in outages.iter().enumerate() {
        writeln!(out, "Outage #{}", i + 1)?;
        writeln!(out, "  Target: {}", outage.target)?;
        writeln!(out, "  Start: {}", outage.start_time.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(out, "  End: {}", outage.end_time.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(out, "  Duration: {}", format_duration(outage.duration()))?;
        writeln!(out, "  Failed Checks: {}", outage.failed_checks)?;
        writeln!(out)?;
    }

    if outages.is_empty() {
        writeln!(out, "No significant outages detected.")?;
    } else {
        writeln!(out, "\nTotal Outages: {}", outages.len())?;
    }

    writeln!(out, "{}", rule)
}

/// Write the report to `<dir>/network_report_<timestamp>/summary.txt`.
pub fn write_text_report(store: &Store, dir: &Path, hours: i64) -> Result<PathBuf, ReportError> {
    let now = Utc::now();
    let report_dir = dir.join(format!("network_report_{}", now.format("%Y-%m-%d_%H-%M-%S")));
    std::fs::create_dir_all(&report_dir)?;

    let path = report_dir.join("summary.txt");
    std::fs::write(&path, render_text_report(store, hours, now)?)?;
    tracing::info!("Report: written to {}", path.display());
    Ok(path)
}

/// Compact `1h2m3s` style rendering.
fn format_duration(d: ChronoDuration) -> String {
    let total = d.num_seconds().max(0);
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m{}s", m, s),
        _ => format!("{}h{}m{}s", h, m, s),
    }
}
