//! The per-chain sync service: wires a [`SyncEngine`] to a single-consumer
//! block queue, a poll timer that enqueues the latest head, and a fatal
//! error route. One worker task processes one block at a time; the poll
//! task never blocks on processing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use evindex_core::error::IndexerError;

use crate::engine::{SyncEngine, SyncEvent, MAX_QUEUED_BLOCKS};
use crate::light_block::LightBlock;
use crate::rpc::RpcClient;
use crate::store::SyncStore;

/// Callback invoked for every event the engine emits.
pub type OnSyncEvent = dyn Fn(SyncEvent) + Send + Sync;

/// Callback invoked once if the worker hits an unrecoverable error. The
/// service stops afterwards; the process is expected to terminate.
pub type OnFatalError = dyn Fn(IndexerError) + Send + Sync;

/// Handle to a running sync service. Dropping the handle does not stop the
/// tasks; call [`SyncServiceHandle::kill`] for a cooperative shutdown.
pub struct SyncServiceHandle<R: RpcClient + 'static, S: SyncStore + 'static> {
    engine: Arc<SyncEngine<R, S>>,
    sender: mpsc::Sender<LightBlock>,
    worker: JoinHandle<()>,
    poller: Option<JoinHandle<()>>,
}

impl<R: RpcClient + 'static, S: SyncStore + 'static> SyncServiceHandle<R, S> {
    /// Enqueue a head directly, bypassing the poll timer. Returns `false`
    /// when the queue is full or the service has stopped (the head is
    /// dropped; the next poll will observe it as a gap and refetch).
    pub fn enqueue(&self, block: LightBlock) -> bool {
        self.sender.try_send(block).is_ok()
    }

    pub fn engine(&self) -> &SyncEngine<R, S> {
        &self.engine
    }

    /// Cooperative shutdown: mark the engine killed, stop the poll timer,
    /// and wait for the worker to drain and exit.
    pub async fn kill(self) {
        self.engine.kill();
        if let Some(poller) = self.poller {
            poller.abort();
            let _ = poller.await;
        }
        drop(self.sender);
        let _ = self.worker.await;
    }
}

/// Spawn the worker (and, when `poll_interval` is given, the poll timer)
/// for `engine`. The queue is bounded at [`MAX_QUEUED_BLOCKS`]; a full
/// queue drops the newest head, which the next poll re-discovers.
pub fn spawn<R: RpcClient + 'static, S: SyncStore + 'static>(
    engine: Arc<SyncEngine<R, S>>,
    poll_interval: Option<Duration>,
    on_event: Arc<OnSyncEvent>,
    on_fatal: Arc<OnFatalError>,
) -> SyncServiceHandle<R, S> {
    let (sender, receiver) = mpsc::channel::<LightBlock>(MAX_QUEUED_BLOCKS);

    let worker = tokio::spawn(worker_loop(engine.clone(), receiver, on_event, on_fatal));

    let poller = poll_interval.map(|interval| {
        let engine = engine.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if engine.is_killed() {
                    break;
                }
                match engine.rpc_latest_block().await {
                    Ok(block) => {
                        if sender.try_send(block).is_err() {
                            warn!(chain_id = engine.chain_id(), "block queue full, dropping polled head");
                        }
                    }
                    Err(err) => {
                        warn!(chain_id = engine.chain_id(), "failed to poll latest block: {err}");
                    }
                }
            }
        })
    });

    SyncServiceHandle { engine, sender, worker, poller }
}

fn backoff_sleep(duration: Duration) -> futures::future::BoxFuture<'static, ()> {
    Box::pin(tokio::time::sleep(duration))
}

async fn worker_loop<R: RpcClient, S: SyncStore>(
    engine: Arc<SyncEngine<R, S>>,
    mut receiver: mpsc::Receiver<LightBlock>,
    on_event: Arc<OnSyncEvent>,
    on_fatal: Arc<OnFatalError>,
) {
    while let Some(block) = receiver.recv().await {
        if engine.is_killed() {
            break;
        }
        let result = engine.on_new_head_with_retry(block, backoff_sleep).await;
        match result {
            Ok(events) => {
                for event in events {
                    on_event(event);
                }
            }
            Err(err) => {
                if engine.is_killed() {
                    // Errors racing a shutdown are reported as part of the
                    // kill, not as failures.
                    break;
                }
                error!(chain_id = engine.chain_id(), "fatal sync error: {err}");
                on_fatal(err);
                break;
            }
        }
    }
    // Drain anything left so kill() observes an empty queue.
    while receiver.try_recv().is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evindex_events::raw::{RawLog, RawReceipt, RawTransaction};
    use std::sync::Mutex;

    use crate::engine::SyncConfig;
    use crate::store::MemorySyncStore;

    struct QuietRpc;

    #[async_trait]
    impl RpcClient for QuietRpc {
        async fn get_latest_block(&self, _chain_id: u64) -> Result<LightBlock, IndexerError> {
            Err(IndexerError::Rpc("not scripted".into()))
        }
        async fn get_finalized_block(&self, _chain_id: u64) -> Result<LightBlock, IndexerError> {
            Err(IndexerError::Rpc("not scripted".into()))
        }
        async fn get_block_by_hash(&self, _chain_id: u64, _hash: &str) -> Result<Option<LightBlock>, IndexerError> {
            Ok(None)
        }
        async fn get_block_by_number(&self, _chain_id: u64, _number: u64) -> Result<Option<LightBlock>, IndexerError> {
            Ok(None)
        }
        async fn get_logs(&self, _chain_id: u64, _from: u64, _to: u64) -> Result<Vec<RawLog>, IndexerError> {
            Ok(vec![])
        }
        async fn get_block_transactions(&self, _chain_id: u64, _number: u64) -> Result<Vec<RawTransaction>, IndexerError> {
            Ok(vec![])
        }
        async fn get_transaction_receipt(&self, _chain_id: u64, _hash: &str) -> Result<Option<RawReceipt>, IndexerError> {
            Ok(None)
        }
    }

    fn block(number: u64, hash: &str, parent: &str) -> LightBlock {
        LightBlock { number, hash: hash.into(), parent_hash: parent.into(), timestamp: number * 12, logs_bloom: "0x0".into() }
    }

    #[tokio::test]
    async fn worker_processes_enqueued_heads_in_order() {
        let engine = Arc::new(SyncEngine::new(
            SyncConfig { chain_id: 1, finality_block_count: 100, ..Default::default() },
            Arc::new(QuietRpc),
            Arc::new(MemorySyncStore::new()),
        ));
        let seen: Arc<Mutex<Vec<SyncEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_cb = seen.clone();
        let handle = spawn(
            engine,
            None,
            Arc::new(move |event| seen_in_cb.lock().unwrap().push(event)),
            Arc::new(|err| panic!("unexpected fatal error: {err}")),
        );

        assert!(handle.enqueue(block(1, "0xb1", "0xgenesis")));
        assert!(handle.enqueue(block(2, "0xb2", "0xb1")));

        // Give the worker a chance to drain both heads.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if seen.lock().unwrap().len() >= 2 {
                break;
            }
        }

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, SyncEvent::Checkpoint { .. })));
        assert_eq!(handle.engine().metrics.sync_block(), 2);

        handle.kill().await;
    }

    #[tokio::test]
    async fn kill_stops_the_worker_and_ignores_later_heads() {
        let engine = Arc::new(SyncEngine::new(
            SyncConfig { chain_id: 1, finality_block_count: 100, ..Default::default() },
            Arc::new(QuietRpc),
            Arc::new(MemorySyncStore::new()),
        ));
        let handle = spawn(engine.clone(), None, Arc::new(|_| {}), Arc::new(|_| {}));

        handle.kill().await;
        assert!(engine.is_killed());
        assert_eq!(engine.metrics.blocks_processed(), 0);
    }
}
