use async_trait::async_trait;
use diskherd_core::{AttachmentDef, DiskAttachment, DiskSpec, HerdError, RefKind, Result};
use diskherd_engine::Engine;
use tracing::info;

use crate::disk::DiskReconciler;
use crate::entity::{EnsureOutcome, EntityAdapter, ensure_entity, equal};

/// Converges the relation between one disk and one VM. Holds a disk
/// reconciler and composes its equality with attachment-owned fields; the
/// disk itself is converged separately, before the attachment.
pub struct AttachmentReconciler<'a, E: Engine + ?Sized> {
    engine: &'a E,
    spec: &'a DiskSpec,
    disk: DiskReconciler<'a, E>,
    vm_id: &'a str,
    disk_id: &'a str,
}

impl<'a, E: Engine + ?Sized> AttachmentReconciler<'a, E> {
    pub fn new(engine: &'a E, spec: &'a DiskSpec, vm_id: &'a str, disk_id: &'a str) -> Self {
        Self {
            engine,
            spec,
            disk: DiskReconciler::new(engine, spec),
            vm_id,
            disk_id,
        }
    }

    pub fn build(&self) -> AttachmentDef {
        AttachmentDef {
            disk_id: self.disk_id.to_string(),
            interface: self.spec.interface_or_default(),
            bootable: self.spec.bootable,
            // Attachments are activated on creation.
            active: true,
        }
    }

    pub async fn reconcile(&self) -> Result<(DiskAttachment, EnsureOutcome)> {
        let existing = self
            .engine
            .attachment_lookup(self.vm_id, self.disk_id)
            .await?;
        ensure_entity(self, existing).await
    }

    /// Detach the disk from the VM; the disk itself survives.
    pub async fn remove(&self) -> Result<bool> {
        match self
            .engine
            .attachment_lookup(self.vm_id, self.disk_id)
            .await?
        {
            Some(attachment) => {
                info!("Detaching disk {} from VM {}", self.disk_id, self.vm_id);
                self.engine.detach_disk(self.vm_id, &attachment.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl<E: Engine + ?Sized> EntityAdapter for AttachmentReconciler<'_, E> {
    type Entity = DiskAttachment;

    async fn create(&self) -> Result<DiskAttachment> {
        info!("Attaching disk {} to VM {}", self.disk_id, self.vm_id);
        self.engine.attach_disk(self.vm_id, &self.build()).await
    }

    async fn update(&self, existing: &DiskAttachment) -> Result<DiskAttachment> {
        info!(
            "Updating attachment of disk {} on VM {}",
            self.disk_id, self.vm_id
        );
        self.engine
            .update_attachment(self.vm_id, &existing.id, &self.build())
            .await
    }

    async fn up_to_date(&self, existing: &DiskAttachment) -> Result<bool> {
        // The attachment owns interface and bootable; everything else is
        // carried by the disk it points at.
        let live_disk = self
            .engine
            .disk_lookup(&existing.disk_id)
            .await?
            .ok_or_else(|| HerdError::ReferenceNotFound {
                kind: RefKind::Disk,
                name: existing.disk_id.clone(),
            })?;

        Ok(self.disk.disk_up_to_date(&live_disk)?
            && equal(self.spec.interface.as_ref(), Some(&existing.interface))
            && equal(self.spec.bootable.as_ref(), Some(&existing.bootable)))
    }
}
