//! SurrealDB-backed log and checkpoints on the RocksDB engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use synapse_events::db::connect;
use synapse_events::{
    Dispatcher, DurableLog, HealthCheck, LogOffset, LogStoreConfig, LogTailer, NeuralMessage,
    NodeId, NodeStatus, OffsetStore, SurrealLog, SurrealOffsetStore, TailConfig,
};

fn health(node: &str) -> NeuralMessage {
    NeuralMessage::broadcast(
        NodeId::new(node),
        HealthCheck {
            node_id: NodeId::new(node),
            status: NodeStatus::Online,
        },
    )
}

#[tokio::test]
async fn tailer_checkpoint_survives_component_restart_on_rocksdb() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogStoreConfig::rocksdb(dir.path().join("bus"));

    let db = connect(&config).await.unwrap();
    {
        let log: Arc<dyn DurableLog> = Arc::new(SurrealLog::open(Arc::clone(&db), &config).await.unwrap());
        let offsets: Arc<dyn OffsetStore> = Arc::new(SurrealOffsetStore::new(Arc::clone(&db)));
        for node in ["a", "b"] {
            log.append(&health(node)).await.unwrap();
        }
        let tailer = LogTailer::new(log, offsets, Arc::new(Dispatcher::new()), TailConfig::default());
        assert_eq!(tailer.catch_up().await.unwrap(), 2);
    }

    let log = Arc::new(SurrealLog::open(Arc::clone(&db), &config).await.unwrap());
    let next = log.append(&health("c")).await.unwrap();
    assert_eq!(next, LogOffset::new(3), "offsets continue after reopen");

    let offsets = Arc::new(SurrealOffsetStore::new(db));
    assert_eq!(offsets.load("synapse").await.unwrap(), Some(LogOffset::new(2)));

    let dispatcher = Arc::new(Dispatcher::new());
    let mut sub = dispatcher.subscribe();
    let tailer = LogTailer::new(log, offsets, dispatcher, TailConfig::default());
    assert_eq!(tailer.catch_up().await.unwrap(), 1);
    assert_eq!(sub.recv().await.unwrap().source(), &NodeId::new("c"));
}
