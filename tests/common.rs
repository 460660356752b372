#![allow(dead_code)]

use std::time::Duration;

use streamvault::{EventData, StoreConfig, StreamId, StreamVault};

/// A connected store backed by a fresh temp directory. Keep the TempDir
/// alive for as long as the store is in use.
pub async fn connected_vault() -> (tempfile::TempDir, StreamVault) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let vault = StreamVault::new(StoreConfig::new(dir.path()));
    vault.connect().await.expect("connect store");
    (dir, vault)
}

/// A disconnected store over an existing data directory, for restart tests.
pub fn vault_at(dir: &tempfile::TempDir) -> StreamVault {
    StreamVault::new(StoreConfig::new(dir.path()))
}

pub fn stream(tenant: &str, categories: &[&str], id: &str) -> StreamId {
    StreamId::new(tenant, categories.iter().copied(), id)
}

pub fn event(stream_id: &StreamId, event_type: &str, payload: &[u8]) -> EventData {
    EventData::new(
        stream_id.clone(),
        event_type,
        Vec::new(),
        payload.to_vec(),
    )
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}
