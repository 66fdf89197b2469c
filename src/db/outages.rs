//! Outage detection over raw samples.
//!
//! Both detectors expect observations ordered by target, then by time. Runs never span
//! two targets.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::models::Outage;

/// Minimum run of consecutive failures reported by [`consecutive_failure_runs`].
pub const CONSECUTIVE_FAILURE_THRESHOLD: usize = 3;

/// Size of the trailing window used by [`sliding_window_runs`].
pub const SLIDING_WINDOW_SIZE: usize = 10;

/// Failures within one full window that mark a sample as part of an outage.
pub const SLIDING_WINDOW_FAILURES: usize = 5;

/// Maximum number of runs returned by the sliding-window detector.
pub const SLIDING_WINDOW_LIMIT: usize = 100;

/// The minimal per-sample view the detectors work on.
#[derive(Debug, Clone)]
pub struct Observation {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Maximal runs of consecutive failures at least `min_len` long, newest first.
pub fn consecutive_failure_runs(observations: &[Observation], min_len: usize) -> Vec<Outage> {
    let flags: Vec<bool> = observations.iter().map(|o| !o.success).collect();
    let mut runs = collapse_flagged(observations, &flags, min_len.max(1));
    sort_newest_first(&mut runs);
    runs
}

/// Runs of samples that sit inside a failing window, newest first.
///
/// A sample is flagged when it and its `window - 1` predecessors for the same target
/// contain at least `min_failures` failures. The window must be full before anything is
/// flagged. Consecutive flagged samples collapse into one outage.
pub fn sliding_window_runs(
    observations: &[Observation],
    window: usize,
    min_failures: usize,
    limit: usize,
) -> Vec<Outage> {
    let window = window.max(1);
    let mut flags = Vec::with_capacity(observations.len());
    let mut recent: VecDeque<bool> = VecDeque::with_capacity(window);
    let mut failures = 0usize;
    let mut current_target: Option<&str> = None;

    for obs in observations {
        if current_target != Some(obs.target.as_str()) {
            recent.clear();
            failures = 0;
            current_target = Some(obs.target.as_str());
        }

        let failed = !obs.success;
        recent.push_back(failed);
        if failed {
            failures += 1;
        }
        if recent.len() > window && recent.pop_front() == Some(true) {
            failures -= 1;
        }

        flags.push(recent.len() == window && failures >= min_failures);
    }

    let mut runs = collapse_flagged(observations, &flags, 1);
    sort_newest_first(&mut runs);
    runs.truncate(limit);
    runs
}

/// Collapse consecutive flagged observations of the same target into outages.
fn collapse_flagged(observations: &[Observation], flags: &[bool], min_len: usize) -> Vec<Outage> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;

    for (i, obs) in observations.iter().enumerate() {
        if let Some(s) = start {
            if observations[s].target != obs.target || !flags[i] {
                push_run(&mut runs, observations, s, i - 1, min_len);
                start = None;
            }
        }
        if flags[i] && start.is_none() {
            start = Some(i);
        }
    }

    if let Some(s) = start {
        push_run(&mut runs, observations, s, observations.len() - 1, min_len);
    }

    runs
}

fn push_run(
    runs: &mut Vec<Outage>,
    observations: &[Observation],
    first: usize,
    last: usize,
    min_len: usize,
) {
    let len = last - first + 1;
    if len < min_len {
        return;
    }
    let head = &observations[first];
    runs.push(Outage::new(
        &head.target,
        head.timestamp,
        observations[last].timestamp,
        len as i64,
    ));
}

fn sort_newest_first(runs: &mut [Outage]) {
    runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
}
