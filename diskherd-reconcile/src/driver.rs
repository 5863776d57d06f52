use std::path::Path;

use diskherd_core::{
    Disk, DiskAttachment, DiskSpec, HerdError, RefKind, Result, TargetState,
};
use diskherd_engine::{Engine, wait_for_disk_status};
use diskherd_transfer::{ImageUpload, ImageUploader, ProxyTls};
use serde::Serialize;
use tracing::info;

use crate::attachment::AttachmentReconciler;
use crate::disk::{DiskReconciler, search_by_lun};
use crate::entity::EnsureOutcome;

/// Result of one reconciliation run. The attachment is reported when a VM
/// reference was in play, the bare disk otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub id: Option<String>,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<Disk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_attachment: Option<DiskAttachment>,
}

/// Top-level decision logic: owns the engine handle and the proxy TLS
/// options for the duration of one run and sequences LUN lookup, disk
/// convergence, storage placement, image upload and VM attachment.
pub struct Driver<'a, E: Engine + ?Sized> {
    engine: &'a E,
    tls: ProxyTls,
    uploader: Option<&'a dyn ImageUpload>,
}

impl<'a, E: Engine + ?Sized> Driver<'a, E> {
    pub fn new(engine: &'a E, tls: ProxyTls) -> Self {
        Self {
            engine,
            tls,
            uploader: None,
        }
    }

    /// Substitute the upload transport, for callers that mediate image
    /// transfers themselves.
    pub fn with_uploader(mut self, uploader: &'a dyn ImageUpload) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub async fn run(&self, spec: &DiskSpec) -> Result<RunOutcome> {
        spec.validate()?;

        let existing = self.find_existing(spec).await?;

        let mut outcome = RunOutcome {
            id: None,
            changed: false,
            disk: None,
            disk_attachment: None,
        };

        match spec.state {
            TargetState::Present | TargetState::Attached | TargetState::Detached => {
                let reconciler = DiskReconciler::new(self.engine, spec);
                let (disk, ensured) = reconciler.reconcile(existing).await?;
                outcome.changed = ensured.changed();
                outcome.changed |= reconciler.update_storage_placement(&disk.id).await?;

                if let Some(image) = &spec.image_path {
                    if ensured == EnsureOutcome::Created || spec.force {
                        self.upload(spec, &disk, image).await?;
                        outcome.changed = true;
                    }
                }

                // Placement and upload may have refreshed remote state.
                let disk = self.engine.disk_lookup(&disk.id).await?.unwrap_or(disk);
                outcome.id = Some(disk.id.clone());
                outcome.disk = Some(disk);
            }
            TargetState::Absent => {
                if let Some(disk) = existing {
                    info!("Removing disk {}", disk.id);
                    self.engine.disk_remove(&disk.id).await?;
                    outcome.id = Some(disk.id);
                    outcome.changed = true;
                }
            }
        }

        // The attachment phase applies when either VM identifier is given,
        // and never to absent disks.
        if spec.state != TargetState::Absent && spec.has_vm_reference() {
            if let Some(disk_id) = outcome.id.clone() {
                self.attachment_phase(spec, &disk_id, &mut outcome).await?;
            }
        }

        Ok(outcome)
    }

    async fn attachment_phase(
        &self,
        spec: &DiskSpec,
        disk_id: &str,
        outcome: &mut RunOutcome,
    ) -> Result<()> {
        let vm_id = self.resolve_vm(spec).await?;
        let reconciler = AttachmentReconciler::new(self.engine, spec, &vm_id, disk_id);

        match spec.state {
            TargetState::Present | TargetState::Attached => {
                let (attachment, ensured) = reconciler.reconcile().await?;
                outcome.changed |= ensured.changed();

                if spec.logical_unit.is_none() && spec.wait {
                    wait_for_disk_status(
                        self.engine,
                        &attachment.disk_id,
                        spec.poll_interval,
                        spec.timeout,
                    )
                    .await?;
                }

                outcome.disk = None;
                outcome.disk_attachment = Some(attachment);
            }
            TargetState::Detached => {
                outcome.changed |= reconciler.remove().await?;
            }
            TargetState::Absent => {}
        }

        Ok(())
    }

    /// LUN-backed disks are located by their logical-unit id; everything
    /// else by id or name.
    async fn find_existing(&self, spec: &DiskSpec) -> Result<Option<Disk>> {
        if let Some(lun) = &spec.logical_unit {
            return search_by_lun(self.engine, &lun.id).await;
        }
        if let Some(id) = &spec.id {
            return self.engine.disk_lookup(id).await;
        }
        if let Some(name) = &spec.name {
            return self.engine.disk_search(name).await;
        }
        Ok(None)
    }

    async fn resolve_vm(&self, spec: &DiskSpec) -> Result<String> {
        if let Some(id) = &spec.vm_id {
            let vm = self.engine.vm_lookup(id).await?.ok_or_else(|| {
                HerdError::ReferenceNotFound {
                    kind: RefKind::Vm,
                    name: id.clone(),
                }
            })?;
            return Ok(vm.id);
        }
        if let Some(name) = &spec.vm_name {
            let vm = self.engine.vm_search(name).await?.ok_or_else(|| {
                HerdError::ReferenceNotFound {
                    kind: RefKind::Vm,
                    name: name.clone(),
                }
            })?;
            return Ok(vm.id);
        }
        Err(HerdError::Config(
            "a VM reference is required for the attachment phase".to_string(),
        ))
    }

    async fn upload(&self, spec: &DiskSpec, disk: &Disk, image: &Path) -> Result<()> {
        match self.uploader {
            Some(uploader) => uploader.upload(disk, image).await,
            None => {
                let uploader = ImageUploader::new(
                    self.engine,
                    self.tls.clone(),
                    spec.poll_interval,
                    spec.timeout,
                );
                uploader.upload(disk, image).await
            }
        }
    }
}

/// Convenience wrapper for one-shot callers.
pub async fn run<E: Engine + ?Sized>(
    engine: &E,
    tls: ProxyTls,
    spec: &DiskSpec,
) -> Result<RunOutcome> {
    Driver::new(engine, tls).run(spec).await
}
