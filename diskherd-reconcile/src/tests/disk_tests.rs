use diskherd_core::{DiskFormat, DiskStatus, DiskStorage, HerdError, LogicalUnit};
use diskherd_engine::{DiskService, MemoryEngine};

use super::{engine_with_domain, spec_for_lun, spec_named};
use crate::disk::{DiskReconciler, search_by_lun};
use crate::entity::EnsureOutcome;

const GIB: u64 = 1024 * 1024 * 1024;

#[tokio::test]
async fn build_maps_format_to_sparseness() {
    let mut spec = spec_named("data");
    spec.size = Some("10GiB".to_string());
    let engine = MemoryEngine::new();

    let def = DiskReconciler::new(&engine, &spec).build().unwrap();
    assert_eq!(def.format, DiskFormat::Cow);
    assert!(def.sparse());
    assert_eq!(def.provisioned_size, Some(10 * GIB));

    spec.format = DiskFormat::Raw;
    let def = DiskReconciler::new(&engine, &spec).build().unwrap();
    assert!(!def.sparse());
}

#[tokio::test]
async fn build_for_lun_carries_no_size() {
    let mut spec = spec_for_lun("1IET_000d0001");
    spec.size = Some("10GiB".to_string());
    let engine = MemoryEngine::new();

    let def = DiskReconciler::new(&engine, &spec).build().unwrap();
    assert!(def.provisioned_size.is_none());
    assert_eq!(
        def.lun.as_ref().map(|l| l.id.as_str()),
        Some("1IET_000d0001")
    );
}

#[tokio::test]
async fn equality_is_reflexive_after_create() {
    let mut spec = spec_named("data");
    spec.size = Some("10GiB".to_string());
    let engine = MemoryEngine::new();
    let reconciler = DiskReconciler::new(&engine, &spec);

    let (disk, outcome) = reconciler.reconcile(None).await.unwrap();
    assert_eq!(outcome, EnsureOutcome::Created);

    let (_, outcome) = reconciler.reconcile(Some(disk)).await.unwrap();
    assert_eq!(outcome, EnsureOutcome::Unchanged);
}

#[tokio::test]
async fn smaller_declared_size_is_ignored() {
    let mut spec = spec_named("data");
    spec.size = Some("10GiB".to_string());
    let engine = MemoryEngine::new();
    let (disk, _) = DiskReconciler::new(&engine, &spec)
        .reconcile(None)
        .await
        .unwrap();

    spec.size = Some("5GiB".to_string());
    let (disk, outcome) = DiskReconciler::new(&engine, &spec)
        .reconcile(Some(disk))
        .await
        .unwrap();

    assert_eq!(outcome, EnsureOutcome::Unchanged);
    assert_eq!(disk.provisioned_size(), Some(10 * GIB));
    assert!(engine.sent_updates().await.is_empty());
}

#[tokio::test]
async fn shrink_is_never_sent_even_when_other_fields_change() {
    let mut spec = spec_named("data");
    spec.size = Some("10GiB".to_string());
    let engine = MemoryEngine::new();
    let (disk, _) = DiskReconciler::new(&engine, &spec)
        .reconcile(None)
        .await
        .unwrap();

    // A differing description forces an update; the smaller size must not
    // ride along with it.
    spec.size = Some("5GiB".to_string());
    spec.description = Some("database volume".to_string());
    let (disk, outcome) = DiskReconciler::new(&engine, &spec)
        .reconcile(Some(disk))
        .await
        .unwrap();

    assert_eq!(outcome, EnsureOutcome::Updated);
    assert_eq!(disk.provisioned_size(), Some(10 * GIB));
    let updates = engine.sent_updates().await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].provisioned_size, Some(10 * GIB));
}

#[tokio::test]
async fn larger_declared_size_grows_the_disk() {
    let mut spec = spec_named("data");
    spec.size = Some("10GiB".to_string());
    let engine = MemoryEngine::new();
    let (disk, _) = DiskReconciler::new(&engine, &spec)
        .reconcile(None)
        .await
        .unwrap();

    spec.size = Some("20GiB".to_string());
    let (disk, outcome) = DiskReconciler::new(&engine, &spec)
        .reconcile(Some(disk))
        .await
        .unwrap();

    assert_eq!(outcome, EnsureOutcome::Updated);
    assert_eq!(disk.provisioned_size(), Some(20 * GIB));
}

#[tokio::test]
async fn move_is_skipped_when_already_placed() {
    let engine = engine_with_domain("data-domain").await;
    let mut spec = spec_named("data");
    spec.size = Some("1GiB".to_string());
    spec.storage_domain = Some("data-domain".to_string());
    let reconciler = DiskReconciler::new(&engine, &spec);

    let (disk, _) = reconciler.reconcile(None).await.unwrap();
    let changed = reconciler.update_storage_placement(&disk.id).await.unwrap();

    assert!(!changed);
    let journal = engine.journal().await;
    assert!(!journal.iter().any(|e| e.starts_with("disk_move")));
}

#[tokio::test]
async fn differing_domain_issues_exactly_one_move() {
    let engine = engine_with_domain("old-domain").await;
    let target = engine.seed_storage_domain("new-domain").await;

    let mut spec = spec_named("data");
    spec.size = Some("1GiB".to_string());
    spec.storage_domain = Some("old-domain".to_string());
    let (disk, _) = DiskReconciler::new(&engine, &spec)
        .reconcile(None)
        .await
        .unwrap();

    spec.storage_domain = Some("new-domain".to_string());
    let reconciler = DiskReconciler::new(&engine, &spec);
    let changed = reconciler.update_storage_placement(&disk.id).await.unwrap();

    assert!(changed);
    let journal = engine.journal().await;
    let moves: Vec<_> = journal
        .iter()
        .filter(|e| e.starts_with("disk_move"))
        .collect();
    assert_eq!(moves.len(), 1);
    assert_eq!(*moves[0], format!("disk_move {} {}", disk.id, target.id));

    let disk = engine.disk_lookup(&disk.id).await.unwrap().unwrap();
    assert_eq!(disk.status, DiskStatus::Ok);
    assert_eq!(disk.primary_storage_domain(), Some(target.id.as_str()));
}

#[tokio::test]
async fn copies_are_issued_on_every_call() {
    let engine = engine_with_domain("backup-a").await;
    engine.seed_storage_domain("backup-b").await;

    let mut spec = spec_named("data");
    spec.size = Some("1GiB".to_string());
    let (disk, _) = DiskReconciler::new(&engine, &spec)
        .reconcile(None)
        .await
        .unwrap();

    spec.storage_domains = vec!["backup-a".to_string(), "backup-b".to_string()];
    let reconciler = DiskReconciler::new(&engine, &spec);

    // Copying creates a new placement every time; two calls mean four
    // copies, not two.
    assert!(reconciler.update_storage_placement(&disk.id).await.unwrap());
    assert!(reconciler.update_storage_placement(&disk.id).await.unwrap());

    let journal = engine.journal().await;
    let copies = journal.iter().filter(|e| e.starts_with("disk_copy")).count();
    assert_eq!(copies, 4);
}

#[tokio::test]
async fn unknown_storage_domain_fails_placement() {
    let engine = MemoryEngine::new();
    let mut spec = spec_named("data");
    spec.size = Some("1GiB".to_string());
    let (disk, _) = DiskReconciler::new(&engine, &spec)
        .reconcile(None)
        .await
        .unwrap();

    spec.storage_domain = Some("nowhere".to_string());
    let err = DiskReconciler::new(&engine, &spec)
        .update_storage_placement(&disk.id)
        .await
        .unwrap_err();
    assert!(matches!(err, HerdError::ReferenceNotFound { .. }));
}

#[tokio::test]
async fn lun_disks_are_exempt_from_placement() {
    let engine = engine_with_domain("data-domain").await;
    let mut spec = spec_for_lun("1IET_000d0001");
    spec.storage_domain = Some("data-domain".to_string());
    let reconciler = DiskReconciler::new(&engine, &spec);

    let (disk, _) = reconciler.reconcile(None).await.unwrap();
    let changed = reconciler.update_storage_placement(&disk.id).await.unwrap();

    assert!(!changed);
    let journal = engine.journal().await;
    assert!(!journal.iter().any(|e| e.starts_with("disk_move")));
    assert!(!journal.iter().any(|e| e.starts_with("disk_copy")));
}

#[tokio::test]
async fn lun_lookup_scans_by_logical_unit_id() {
    let engine = MemoryEngine::new();

    let lun_spec = spec_for_lun("A");
    let (lun_disk, _) = DiskReconciler::new(&engine, &lun_spec)
        .reconcile(None)
        .await
        .unwrap();

    let mut image_spec = spec_named("plain");
    image_spec.size = Some("1GiB".to_string());
    DiskReconciler::new(&engine, &image_spec)
        .reconcile(None)
        .await
        .unwrap();

    let found = search_by_lun(&engine, "A").await.unwrap();
    assert_eq!(found.map(|d| d.id), Some(lun_disk.id));
    assert!(search_by_lun(&engine, "B").await.unwrap().is_none());
}

#[tokio::test]
async fn lun_disks_are_never_updated() {
    let engine = MemoryEngine::new();
    let spec = spec_for_lun("1IET_000d0001");
    let reconciler = DiskReconciler::new(&engine, &spec);
    let (disk, _) = reconciler.reconcile(None).await.unwrap();

    let mut respec = spec_for_lun("1IET_000d0001");
    respec.description = Some("changed".to_string());
    let (_, outcome) = DiskReconciler::new(&engine, &respec)
        .reconcile(Some(disk))
        .await
        .unwrap();
    assert_eq!(outcome, EnsureOutcome::Unchanged);
}

#[tokio::test]
async fn lun_storage_round_trips_through_the_engine() {
    let engine = MemoryEngine::new();
    let mut lun = LogicalUnit::new("1IET_000d0001");
    lun.address = Some("10.34.63.204".to_string());
    lun.target = Some("iqn.2016-08-09.example:target".to_string());

    let mut spec = spec_for_lun("ignored");
    spec.logical_unit = Some(lun.clone());
    let (disk, _) = DiskReconciler::new(&engine, &spec)
        .reconcile(None)
        .await
        .unwrap();

    match &disk.storage {
        DiskStorage::Lun(stored) => {
            assert_eq!(stored, &lun);
            assert_eq!(stored.port, 3260);
        }
        DiskStorage::Image { .. } => panic!("expected a LUN disk"),
    }
}
