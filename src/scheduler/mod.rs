//! Scheduler module: sampling workers, the result sink and periodic maintenance.

mod maintenance;
mod sink;
mod worker;

pub use maintenance::*;

use sink::run_result_sink;
use worker::run_sampling_worker;

use crate::db::{Sample, Store};
use crate::probe::Prober;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Shared capacity of the pipeline between workers and the sink.
pub const PIPELINE_CAPACITY: usize = 100;

/// What to sample and how often.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub targets: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub maintenance_interval: Duration,
    pub pipeline_capacity: usize,
}

impl MonitorConfig {
    pub fn new(targets: Vec<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            targets,
            interval,
            timeout,
            maintenance_interval: MAINTENANCE_INTERVAL,
            pipeline_capacity: PIPELINE_CAPACITY,
        }
    }
}

/// Owns the lifecycle of every background task.
///
/// Call [`Monitor::start`] once, then [`Monitor::stop`] followed by [`Monitor::wait`].
/// Starting twice or waiting without stopping are caller errors.
pub struct Monitor {
    config: MonitorConfig,
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    stop_tx: broadcast::Sender<()>,
    result_tx: Option<mpsc::Sender<Sample>>,
    result_rx: Option<mpsc::Receiver<Sample>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, store: Arc<Store>, prober: Arc<dyn Prober>) -> Self {
        let (result_tx, result_rx) = mpsc::channel(config.pipeline_capacity.max(1));
        let (stop_tx, _) = broadcast::channel(1);

        Self {
            config,
            store,
            prober,
            stop_tx,
            result_tx: Some(result_tx),
            result_rx: Some(result_rx),
            tasks: Vec::new(),
        }
    }

    /// Spawn the result sink, one worker per target and the maintenance cycle.
    pub fn start(&mut self) {
        let (Some(result_rx), Some(result_tx)) = (self.result_rx.take(), self.result_tx.clone())
        else {
            tracing::warn!("Monitor: start called on a monitor that already ran");
            return;
        };

        tracing::info!(
            "Monitor: starting with {} targets, interval {:?}, timeout {:?}",
            self.config.targets.len(),
            self.config.interval,
            self.config.timeout
        );

        self.tasks.push(tokio::spawn(run_result_sink(
            result_rx,
            self.store.clone(),
            self.stop_tx.subscribe(),
        )));

        for target in &self.config.targets {
            tracing::info!("Monitor: adding target {}", target);
            self.tasks.push(tokio::spawn(run_sampling_worker(
                target.clone(),
                self.prober.clone(),
                self.config.interval,
                self.config.timeout,
                result_tx.clone(),
                self.stop_tx.subscribe(),
            )));
        }

        self.tasks.push(tokio::spawn(run_maintenance(
            self.store.clone(),
            self.config.maintenance_interval,
            self.stop_tx.subscribe(),
        )));
    }

    /// Signal every task to finish and close the pipeline.
    pub fn stop(&mut self) {
        tracing::info!("Monitor: stopping");
        // No receivers left just means every task already exited
        let _ = self.stop_tx.send(());
        self.result_tx = None;
    }

    /// Block until every spawned task has returned.
    pub async fn wait(&mut self) {
        for handle in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("Monitor: task ended abnormally: {}", e);
            }
        }
        tracing::info!("Monitor: stopped");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::db::Sample;
    use crate::probe::{ProbeError, Prober};

    /// Answers instantly with a healthy 1ms sample.
    #[derive(Default)]
    pub struct StubProber {
        calls: AtomicUsize,
    }

    impl StubProber {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for StubProber {
        async fn probe(&self, target: &str, _timeout: Duration) -> Result<Sample, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Sample::success(target, Utc::now(), 1.0))
        }
    }

    /// Fails every call as if the ping binary were missing.
    #[derive(Default)]
    pub struct FailingProber {
        calls: AtomicUsize,
    }

    impl FailingProber {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for FailingProber {
        async fn probe(&self, _target: &str, _timeout: Duration) -> Result<Sample, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::Spawn {
                program: "ping".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }
}
