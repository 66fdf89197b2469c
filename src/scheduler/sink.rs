//! Single writer draining the result pipeline into the store.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::db::{Sample, Store};

/// Persist every sample received until stopped.
///
/// On stop the pipeline is closed, whatever is already queued is written, and the task
/// returns. A failed write is logged and the sample is discarded.
pub(crate) async fn run_result_sink(
    mut rx: mpsc::Receiver<Sample>,
    store: Arc<Store>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut written: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                rx.close();
                while let Some(sample) = rx.recv().await {
                    written += persist(&store, &sample) as u64;
                }
                break;
            }
            received = rx.recv() => match received {
                Some(sample) => written += persist(&store, &sample) as u64,
                None => break,
            },
        }
    }

    tracing::info!("ResultSink: stopped after writing {} samples", written);
}

fn persist(store: &Store, sample: &Sample) -> bool {
    match store.append(sample) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("ResultSink: failed to save sample for {}: {}", sample.target, e);
            false
        }
    }
}
