//! Per-target sampling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use crate::db::Sample;
use crate::probe::Prober;

/// Probe `target` every `interval` until told to stop.
///
/// The first probe runs immediately. Samples are handed to the pipeline without
/// waiting: when it is full the sample is dropped so the loop never stalls behind the
/// writer. A probe in flight is allowed to finish (it is bounded by `timeout`) before
/// the stop signal is observed.
pub(crate) async fn run_sampling_worker(
    target: String,
    prober: Arc<dyn Prober>,
    interval: Duration,
    timeout: Duration,
    tx: mpsc::Sender<Sample>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let interval = if interval.is_zero() {
        Duration::from_secs(1)
    } else {
        interval
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!("Worker: sampling {} every {:?}", target, interval);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {
                let sample = match prober.probe(&target, timeout).await {
                    Ok(sample) => sample,
                    Err(e) => {
                        tracing::error!("Worker: failed to probe {}: {}", target, e);
                        continue;
                    }
                };

                match tx.try_send(sample) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!("Worker: result pipeline full, dropping sample for {}", target);
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!("Worker: result pipeline closed, stopping {}", target);
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("Worker: stopped sampling {}", target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::{FailingProber, StubProber};

    fn spawn_worker(
        prober: Arc<dyn Prober>,
        interval: Duration,
        tx: mpsc::Sender<Sample>,
    ) -> (broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_sampling_worker(
            "192.0.2.10".to_string(),
            prober,
            interval,
            Duration::from_secs(1),
            tx,
            stop_rx,
        ));
        (stop_tx, handle)
    }

    #[tokio::test]
    async fn test_worker_probes_immediately_then_on_interval() {
        let prober = Arc::new(StubProber::default());
        let (tx, mut rx) = mpsc::channel(100);
        let (stop_tx, handle) = spawn_worker(prober.clone(), Duration::from_millis(100), tx);

        let first = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("first probe should not wait for the interval")
            .unwrap();
        assert_eq!(first.target, "192.0.2.10");
        assert!(first.success);

        tokio::time::sleep(Duration::from_millis(250)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        let mut count = 1;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert!(count >= 3, "expected at least 3 samples, got {}", count);
    }

    #[tokio::test]
    async fn test_worker_drops_samples_when_pipeline_full() {
        let prober = Arc::new(StubProber::default());
        // nobody drains this pipeline
        let (tx, mut rx) = mpsc::channel(1);
        let (stop_tx, handle) = spawn_worker(prober.clone(), Duration::from_millis(10), tx);

        tokio::time::sleep(Duration::from_millis(200)).await;
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker must not block on a full pipeline")
            .unwrap();

        assert!(prober.calls() > 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_worker_stops_mid_interval() {
        let prober = Arc::new(StubProber::default());
        let (tx, mut rx) = mpsc::channel(10);
        let (stop_tx, handle) = spawn_worker(prober, Duration::from_secs(3600), tx);

        rx.recv().await.unwrap();
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("stop must interrupt the interval wait")
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_exits_when_pipeline_closed() {
        let prober = Arc::new(StubProber::default());
        let (tx, mut rx) = mpsc::channel(10);
        rx.close();
        let (_stop_tx, handle) = spawn_worker(prober, Duration::from_millis(10), tx);

        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("worker should stop once the pipeline is closed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_survives_probe_errors() {
        let prober = Arc::new(FailingProber::default());
        let (tx, mut rx) = mpsc::channel(10);
        let (stop_tx, handle) = spawn_worker(prober.clone(), Duration::from_millis(10), tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(prober.calls() > 1);
        assert!(rx.try_recv().is_err());
    }
}
