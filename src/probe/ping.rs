//! Ping probe implementation on top of the system `ping` command.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::process::Command;

use super::{ProbeError, Prober};
use crate::db::Sample;

/// Binary used when no other program is configured.
pub const DEFAULT_PING_PROGRAM: &str = "ping";

/// Extra time granted past the nominal timeout for the child to exit on its own.
const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

/// Message recorded when the command succeeded but printed no usable round-trip time.
pub const UNPARSEABLE_RTT: &str = "unable to parse round-trip time";

/// Probes targets by running the system ping command once per call.
#[derive(Debug, Clone)]
pub struct PingProber {
    program: String,
}

impl Default for PingProber {
    fn default() -> Self {
        Self::new()
    }
}

impl PingProber {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_PING_PROGRAM)
    }

    /// Use a different binary, e.g. an absolute path to `ping`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<Sample, ProbeError> {
        let started = Utc::now();
        let timeout = normalize_timeout(timeout);

        let child = Command::new(&self.program)
            .args(build_ping_args(target, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(timeout + TEARDOWN_GRACE, child.wait_with_output())
            .await
        {
            Ok(output) => output?,
            Err(_) => {
                return Ok(Sample::failure(
                    target,
                    started,
                    format!("ping timed out after {:?}", timeout),
                ));
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let trimmed = text.trim();
            let reason = if trimmed.is_empty() {
                output.status.to_string()
            } else {
                trimmed.to_string()
            };
            return Ok(Sample::failure(target, started, reason));
        }

        match parse_ping_output(&text) {
            Some(rtt) if rtt > 0.0 => Ok(Sample::success(target, started, rtt)),
            _ => {
                tracing::debug!("Ping probe: unparseable output for {}: {}", target, text.trim());
                Ok(Sample::failure(target, started, UNPARSEABLE_RTT))
            }
        }
    }
}

fn normalize_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        Duration::from_secs(1)
    } else {
        timeout
    }
}

/// Command-line arguments for a single echo request on the current platform.
pub fn build_ping_args(target: &str, timeout: Duration) -> Vec<String> {
    let millis = timeout.as_millis().max(1);

    let mut args: Vec<String> = if cfg!(target_os = "windows") {
        vec!["-n".into(), "1".into(), "-w".into(), millis.to_string()]
    } else if cfg!(target_os = "macos") {
        vec!["-n".into(), "-c".into(), "1".into(), "-W".into(), millis.to_string()]
    } else {
        let secs = ((millis + 999) / 1000).max(1);
        vec!["-n".into(), "-c".into(), "1".into(), "-W".into(), secs.to_string()]
    };
    args.push(target.to_string());
    args
}

/// Extract the round-trip time in milliseconds from ping output.
///
/// Patterns are tried in order and the first one that yields a number wins. Returns
/// `None` when the output carries no timing at all.
pub fn parse_ping_output(output: &str) -> Option<f64> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            // Windows reply: "time=44ms" (never "time<1ms")
            r"time=([0-9.]+)ms",
            // Per-reply line: "time=44.347 ms"
            r"time=([0-9.]+)\s*ms",
            // macOS summary
            r"round-trip min/avg/max/stddev = [0-9.]+/([0-9.]+)/[0-9.]+/[0-9.]+\s*ms",
            // BusyBox summary
            r"round-trip min/avg/max = [0-9.]+/([0-9.]+)/[0-9.]+\s*ms",
            // iputils summary
            r"rtt min/avg/max/mdev = [0-9.]+/([0-9.]+)/[0-9.]+/[0-9.]+\s*ms",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    });

    patterns.iter().find_map(|re| {
        re.captures(output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    })
}
