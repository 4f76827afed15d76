use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::observability::WAL_COMPACTIONS_TOTAL;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once the WAL has grown by `threshold` appends. Returns whether a
/// compaction ran.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::wal::Wal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vacancy_test_compactor_{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();
        let key = ResourceKey::new("R1", ResourceType::Room);
        engine
            .register_resource(key.clone(), None, 1, Category::General)
            .await
            .unwrap();
        for capacity in 2..=5 {
            engine.update_resource(&key, None, capacity).await.unwrap();
        }

        assert!(!maybe_compact(&engine, 10).await.unwrap());
        assert_eq!(Wal::replay(&path).unwrap().len(), 5);

        assert!(maybe_compact(&engine, 5).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let events = Wal::replay(&path).unwrap();
        assert_eq!(
            events,
            vec![Event::ResourceRegistered {
                key,
                name: None,
                capacity: 5,
                category: Category::General,
            }]
        );
    }
}
