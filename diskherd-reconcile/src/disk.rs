use async_trait::async_trait;
use diskherd_core::{
    Disk, DiskDef, DiskSpec, HerdError, RefKind, Result, StorageDomain, parse_size,
};
use diskherd_engine::{DiskService, Engine, wait_for_disk_status};
use tracing::info;

use crate::entity::{EnsureOutcome, EntityAdapter, ensure_entity, equal};

/// Find an existing LUN-backed disk by its logical-unit id. LUN disks are
/// identified this way, never by name or id.
pub async fn search_by_lun<S>(service: &S, lun_id: &str) -> Result<Option<Disk>>
where
    S: DiskService + ?Sized,
{
    let disks = service.disk_list().await?;
    Ok(disks.into_iter().find(|d| d.lun_id() == Some(lun_id)))
}

/// Converges one disk entity toward its declared state.
pub struct DiskReconciler<'a, E: Engine + ?Sized> {
    engine: &'a E,
    spec: &'a DiskSpec,
}

impl<'a, E: Engine + ?Sized> DiskReconciler<'a, E> {
    pub fn new(engine: &'a E, spec: &'a DiskSpec) -> Self {
        Self { engine, spec }
    }

    /// Desired disk representation. A LUN descriptor replaces provisioned
    /// size; the LUN's own geometry describes the storage.
    pub fn build(&self) -> Result<DiskDef> {
        let provisioned_size = match (&self.spec.logical_unit, &self.spec.size) {
            (Some(_), _) | (None, None) => None,
            (None, Some(size)) => Some(parse_size(size)?),
        };

        Ok(DiskDef {
            name: self.spec.name.clone(),
            description: self.spec.description.clone(),
            format: self.spec.format,
            provisioned_size,
            shareable: self.spec.shareable,
            storage_domain: self.spec.storage_domain.clone(),
            lun: self.spec.logical_unit.clone(),
        })
    }

    /// Update equality over description, provisioned size and shareable.
    /// Format cannot be changed after creation and is not compared. A
    /// declared size smaller than the live size counts as equal; shrinking
    /// is never requested. LUN-backed disks are never updated.
    pub fn disk_up_to_date(&self, disk: &Disk) -> Result<bool> {
        if disk.is_lun() {
            return Ok(true);
        }

        let grow_needed = match (self.desired_size()?, disk.provisioned_size()) {
            (Some(want), Some(have)) => want > have,
            (Some(_), None) => true,
            (None, _) => false,
        };

        Ok(!grow_needed
            && equal(self.spec.description.as_ref(), disk.description.as_ref())
            && equal(self.spec.shareable.as_ref(), Some(&disk.shareable)))
    }

    fn desired_size(&self) -> Result<Option<u64>> {
        self.spec.size.as_deref().map(parse_size).transpose()
    }

    /// Converge the disk itself and, for non-LUN disks, wait for it to
    /// settle into `ok`.
    pub async fn reconcile(&self, existing: Option<Disk>) -> Result<(Disk, EnsureOutcome)> {
        let (disk, outcome) = ensure_entity(self, existing).await?;
        if outcome.changed() && !disk.is_lun() && self.spec.wait {
            wait_for_disk_status(
                self.engine,
                &disk.id,
                self.spec.poll_interval,
                self.spec.timeout,
            )
            .await?;
        }
        Ok((disk, outcome))
    }

    /// Reconcile storage placement as its own step. The single
    /// `storage_domain` move is skipped when the disk already lives there;
    /// the `storage_domains` copies are issued on every call — copying is
    /// not idempotent, and callers own the decision to re-run it.
    pub async fn update_storage_placement(&self, disk_id: &str) -> Result<bool> {
        let disk = self
            .engine
            .disk_lookup(disk_id)
            .await?
            .ok_or_else(|| HerdError::ReferenceNotFound {
                kind: RefKind::Disk,
                name: disk_id.to_string(),
            })?;

        // Move and copy only apply to file-based images.
        if disk.is_lun() {
            return Ok(false);
        }

        let mut changed = false;

        if let Some(name) = &self.spec.storage_domain {
            let domain = self.resolve_domain(name).await?;
            if disk.primary_storage_domain() != Some(domain.id.as_str()) {
                info!("Moving disk {disk_id} to storage domain {name}");
                self.engine.disk_move(disk_id, &domain.id).await?;
                self.wait_for_ok(disk_id).await?;
                changed = true;
            }
        }

        for name in &self.spec.storage_domains {
            let domain = self.resolve_domain(name).await?;
            info!("Copying disk {disk_id} to storage domain {name}");
            self.engine.disk_copy(disk_id, &domain.id).await?;
            self.wait_for_ok(disk_id).await?;
            changed = true;
        }

        Ok(changed)
    }

    async fn wait_for_ok(&self, disk_id: &str) -> Result<()> {
        if !self.spec.wait {
            return Ok(());
        }
        wait_for_disk_status(
            self.engine,
            disk_id,
            self.spec.poll_interval,
            self.spec.timeout,
        )
        .await
    }

    async fn resolve_domain(&self, name: &str) -> Result<StorageDomain> {
        self.engine
            .storage_domain_search(name)
            .await?
            .ok_or_else(|| HerdError::ReferenceNotFound {
                kind: RefKind::StorageDomain,
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl<E: Engine + ?Sized> EntityAdapter for DiskReconciler<'_, E> {
    type Entity = Disk;

    async fn create(&self) -> Result<Disk> {
        let def = self.build()?;
        info!("Creating disk {}", def.name.as_deref().unwrap_or("<unnamed>"));
        self.engine.disk_add(&def).await
    }

    async fn update(&self, existing: &Disk) -> Result<Disk> {
        let mut def = self.build()?;
        // Size only grows; clamp to the live size rather than shrink.
        if let (Some(want), Some(have)) = (def.provisioned_size, existing.provisioned_size()) {
            if want < have {
                def.provisioned_size = Some(have);
            }
        }
        info!("Updating disk {}", existing.id);
        self.engine.disk_update(&existing.id, &def).await
    }

    async fn up_to_date(&self, existing: &Disk) -> Result<bool> {
        self.disk_up_to_date(existing)
    }
}
