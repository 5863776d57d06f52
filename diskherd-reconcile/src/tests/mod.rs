mod disk_tests;

use std::time::Duration;

use diskherd_core::{DiskSpec, LogicalUnit};
use diskherd_engine::MemoryEngine;

/// Spec with fast polling so status waits resolve instantly in tests.
pub fn spec_named(name: &str) -> DiskSpec {
    DiskSpec {
        name: Some(name.to_string()),
        poll_interval: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
        ..DiskSpec::default()
    }
}

pub fn spec_for_lun(lun_id: &str) -> DiskSpec {
    DiskSpec {
        logical_unit: Some(LogicalUnit::new(lun_id)),
        poll_interval: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
        ..DiskSpec::default()
    }
}

pub async fn engine_with_domain(name: &str) -> MemoryEngine {
    let engine = MemoryEngine::new();
    engine.seed_storage_domain(name).await;
    engine
}
