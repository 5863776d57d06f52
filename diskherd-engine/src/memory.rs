use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use diskherd_core::{
    AttachmentDef, Disk, DiskAttachment, DiskDef, DiskStatus, DiskStorage, HerdError, RefKind,
    Result, StorageDomain, TransferPhase, TransferSession, Vm,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Infrastructure-free engine backed by in-process maps. It honors the same
/// service contracts as the HTTP client and is what the test-suite runs
/// against; seed helpers populate VMs, storage domains and disks, and the
/// journal records every mutating call for assertions.
#[derive(Default)]
pub struct MemoryEngine {
    state: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    disks: HashMap<String, Disk>,
    vms: HashMap<String, Vm>,
    domains: HashMap<String, StorageDomain>,
    attachments: HashMap<String, Vec<DiskAttachment>>,
    transfers: HashMap<String, TransferState>,
    transfer_behavior: TransferBehavior,
    journal: Vec<String>,
    updates: Vec<DiskDef>,
}

struct TransferState {
    session: TransferSession,
    init_polls_left: u32,
    finalize_polls_left: u32,
    finalized: bool,
}

/// How scripted transfer sessions move through their phases.
#[derive(Clone, Copy)]
pub struct TransferBehavior {
    /// Polls that still report `initializing` after the session starts.
    pub init_polls: u32,
    /// Polls that report `finalizing_success` after finalize is requested.
    pub finalize_polls: u32,
    /// Phase the session lands in once finalization settles.
    pub terminal_phase: TransferPhase,
}

impl Default for TransferBehavior {
    fn default() -> Self {
        Self {
            init_polls: 1,
            finalize_polls: 1,
            terminal_phase: TransferPhase::FinishedSuccess,
        }
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_vm(&self, name: &str) -> Vm {
        let vm = Vm {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        self.state.write().await.vms.insert(vm.id.clone(), vm.clone());
        vm
    }

    pub async fn seed_storage_domain(&self, name: &str) -> StorageDomain {
        let domain = StorageDomain {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        self.state
            .write()
            .await
            .domains
            .insert(domain.id.clone(), domain.clone());
        domain
    }

    pub async fn seed_disk(&self, disk: Disk) {
        self.state.write().await.disks.insert(disk.id.clone(), disk);
    }

    pub async fn set_transfer_behavior(&self, behavior: TransferBehavior) {
        self.state.write().await.transfer_behavior = behavior;
    }

    /// Mutating calls recorded so far, e.g. `disk_move <id> <domain>`.
    pub async fn journal(&self) -> Vec<String> {
        self.state.read().await.journal.clone()
    }

    /// Every `DiskDef` an update call carried, in order.
    pub async fn sent_updates(&self) -> Vec<DiskDef> {
        self.state.read().await.updates.clone()
    }
}

impl State {
    fn record(&mut self, entry: String) {
        debug!("engine call: {entry}");
        self.journal.push(entry);
    }

    fn materialize(&self, def: &DiskDef, id: String) -> Result<Disk> {
        let storage = match &def.lun {
            Some(lun) => DiskStorage::Lun(lun.clone()),
            None => {
                let storage_domains = match &def.storage_domain {
                    Some(name) => vec![self.domain_by_name(name)?.id.clone()],
                    None => Vec::new(),
                };
                DiskStorage::Image {
                    format: def.format,
                    provisioned_size: def.provisioned_size.unwrap_or(0),
                    storage_domains,
                }
            }
        };

        Ok(Disk {
            id,
            name: def.name.clone(),
            description: def.description.clone(),
            status: DiskStatus::Ok,
            shareable: def.shareable.unwrap_or(false),
            storage,
        })
    }

    fn domain_by_name(&self, name: &str) -> Result<&StorageDomain> {
        self.domains
            .values()
            .find(|d| d.name == name)
            .ok_or_else(|| HerdError::ReferenceNotFound {
                kind: RefKind::StorageDomain,
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl crate::service::DiskService for MemoryEngine {
    async fn disk_list(&self) -> Result<Vec<Disk>> {
        Ok(self.state.read().await.disks.values().cloned().collect())
    }

    async fn disk_lookup(&self, id: &str) -> Result<Option<Disk>> {
        Ok(self.state.read().await.disks.get(id).cloned())
    }

    async fn disk_search(&self, name: &str) -> Result<Option<Disk>> {
        Ok(self
            .state
            .read()
            .await
            .disks
            .values()
            .find(|d| d.name.as_deref() == Some(name))
            .cloned())
    }

    async fn disk_add(&self, def: &DiskDef) -> Result<Disk> {
        let mut state = self.state.write().await;
        let disk = state.materialize(def, Uuid::new_v4().to_string())?;
        state.record(format!("disk_add {}", disk.id));
        state.disks.insert(disk.id.clone(), disk.clone());
        Ok(disk)
    }

    async fn disk_update(&self, id: &str, def: &DiskDef) -> Result<Disk> {
        let mut state = self.state.write().await;
        let Some(mut disk) = state.disks.get(id).cloned() else {
            return Err(HerdError::RemoteOperation {
                operation: "disk update".to_string(),
                message: format!("no disk with id {id}"),
            });
        };

        disk.description = def.description.clone().or(disk.description);
        if let Some(shareable) = def.shareable {
            disk.shareable = shareable;
        }
        if let (
            DiskStorage::Image {
                provisioned_size, ..
            },
            Some(size),
        ) = (&mut disk.storage, def.provisioned_size)
        {
            *provisioned_size = size;
        }

        state.record(format!("disk_update {id}"));
        state.updates.push(def.clone());
        state.disks.insert(id.to_string(), disk.clone());
        Ok(disk)
    }

    async fn disk_remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.disks.remove(id).is_none() {
            return Err(HerdError::RemoteOperation {
                operation: "disk remove".to_string(),
                message: format!("no disk with id {id}"),
            });
        }
        // Removing a disk detaches it everywhere.
        for attachments in state.attachments.values_mut() {
            attachments.retain(|a| a.disk_id != id);
        }
        state.record(format!("disk_remove {id}"));
        Ok(())
    }

    async fn disk_move(&self, id: &str, storage_domain_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(disk) = state.disks.get_mut(id) else {
            return Err(HerdError::RemoteOperation {
                operation: "disk move".to_string(),
                message: format!("no disk with id {id}"),
            });
        };
        match &mut disk.storage {
            DiskStorage::Image {
                storage_domains, ..
            } => {
                if storage_domains.is_empty() {
                    storage_domains.push(storage_domain_id.to_string());
                } else {
                    storage_domains[0] = storage_domain_id.to_string();
                }
            }
            DiskStorage::Lun(_) => {
                return Err(HerdError::RemoteOperation {
                    operation: "disk move".to_string(),
                    message: "cannot move a direct LUN disk".to_string(),
                });
            }
        }
        state.record(format!("disk_move {id} {storage_domain_id}"));
        Ok(())
    }

    async fn disk_copy(&self, id: &str, storage_domain_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(disk) = state.disks.get_mut(id) else {
            return Err(HerdError::RemoteOperation {
                operation: "disk copy".to_string(),
                message: format!("no disk with id {id}"),
            });
        };
        match &mut disk.storage {
            DiskStorage::Image {
                storage_domains, ..
            } => storage_domains.push(storage_domain_id.to_string()),
            DiskStorage::Lun(_) => {
                return Err(HerdError::RemoteOperation {
                    operation: "disk copy".to_string(),
                    message: "cannot copy a direct LUN disk".to_string(),
                });
            }
        }
        state.record(format!("disk_copy {id} {storage_domain_id}"));
        Ok(())
    }
}

#[async_trait]
impl crate::service::VmService for MemoryEngine {
    async fn vm_lookup(&self, id: &str) -> Result<Option<Vm>> {
        Ok(self.state.read().await.vms.get(id).cloned())
    }

    async fn vm_search(&self, name: &str) -> Result<Option<Vm>> {
        Ok(self
            .state
            .read()
            .await
            .vms
            .values()
            .find(|vm| vm.name == name)
            .cloned())
    }

    async fn attachment_list(&self, vm_id: &str) -> Result<Vec<DiskAttachment>> {
        Ok(self
            .state
            .read()
            .await
            .attachments
            .get(vm_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn attachment_lookup(
        &self,
        vm_id: &str,
        disk_id: &str,
    ) -> Result<Option<DiskAttachment>> {
        Ok(self
            .state
            .read()
            .await
            .attachments
            .get(vm_id)
            .and_then(|atts| atts.iter().find(|a| a.disk_id == disk_id))
            .cloned())
    }

    async fn attach_disk(&self, vm_id: &str, def: &AttachmentDef) -> Result<DiskAttachment> {
        let mut state = self.state.write().await;
        if !state.vms.contains_key(vm_id) {
            return Err(HerdError::RemoteOperation {
                operation: "disk attach".to_string(),
                message: format!("no VM with id {vm_id}"),
            });
        }
        let attachment = DiskAttachment {
            id: def.disk_id.clone(),
            disk_id: def.disk_id.clone(),
            interface: def.interface,
            bootable: def.bootable.unwrap_or(false),
            active: def.active,
        };
        state.record(format!("attach_disk {vm_id} {}", def.disk_id));
        state
            .attachments
            .entry(vm_id.to_string())
            .or_default()
            .push(attachment.clone());
        Ok(attachment)
    }

    async fn update_attachment(
        &self,
        vm_id: &str,
        attachment_id: &str,
        def: &AttachmentDef,
    ) -> Result<DiskAttachment> {
        let mut state = self.state.write().await;
        state.record(format!("update_attachment {vm_id} {attachment_id}"));
        let attachment = state
            .attachments
            .get_mut(vm_id)
            .and_then(|atts| atts.iter_mut().find(|a| a.id == attachment_id))
            .ok_or_else(|| HerdError::RemoteOperation {
                operation: "attachment update".to_string(),
                message: format!("no attachment {attachment_id} on VM {vm_id}"),
            })?;
        attachment.interface = def.interface;
        if let Some(bootable) = def.bootable {
            attachment.bootable = bootable;
        }
        Ok(attachment.clone())
    }

    async fn detach_disk(&self, vm_id: &str, attachment_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(attachments) = state.attachments.get_mut(vm_id) else {
            return Err(HerdError::RemoteOperation {
                operation: "disk detach".to_string(),
                message: format!("no VM with id {vm_id}"),
            });
        };
        attachments.retain(|a| a.id != attachment_id);
        state.record(format!("detach_disk {vm_id} {attachment_id}"));
        Ok(())
    }
}

#[async_trait]
impl crate::service::StorageDomainService for MemoryEngine {
    async fn storage_domain_search(&self, name: &str) -> Result<Option<StorageDomain>> {
        Ok(self
            .state
            .read()
            .await
            .domains
            .values()
            .find(|d| d.name == name)
            .cloned())
    }
}

#[async_trait]
impl crate::service::ImageTransferService for MemoryEngine {
    async fn transfer_start(&self, disk_id: &str) -> Result<TransferSession> {
        let mut state = self.state.write().await;
        let behavior = state.transfer_behavior;
        let id = Uuid::new_v4().to_string();
        let phase = if behavior.init_polls > 0 {
            TransferPhase::Initializing
        } else {
            TransferPhase::Transferring
        };
        let session = TransferSession {
            id: id.clone(),
            phase,
            signed_ticket: Some(format!("ticket-{id}")),
            proxy_url: Some(format!("https://proxy.example.com:54323/images/{id}")),
        };
        state.record(format!("transfer_start {disk_id}"));
        state.transfers.insert(
            id,
            TransferState {
                session: session.clone(),
                init_polls_left: behavior.init_polls,
                finalize_polls_left: behavior.finalize_polls,
                finalized: false,
            },
        );
        Ok(session)
    }

    async fn transfer_get(&self, id: &str) -> Result<TransferSession> {
        let mut state = self.state.write().await;
        let behavior = state.transfer_behavior;
        let transfer =
            state
                .transfers
                .get_mut(id)
                .ok_or_else(|| HerdError::RemoteOperation {
                    operation: "transfer get".to_string(),
                    message: format!("no transfer session {id}"),
                })?;

        if transfer.init_polls_left > 0 {
            transfer.init_polls_left -= 1;
            if transfer.init_polls_left == 0 {
                transfer.session.phase = TransferPhase::Transferring;
            }
        } else if transfer.finalized {
            if transfer.finalize_polls_left > 0 {
                transfer.finalize_polls_left -= 1;
                transfer.session.phase = TransferPhase::FinalizingSuccess;
            } else {
                transfer.session.phase = behavior.terminal_phase;
            }
        }

        Ok(transfer.session.clone())
    }

    async fn transfer_extend(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.transfers.contains_key(id) {
            return Err(HerdError::RemoteOperation {
                operation: "transfer extend".to_string(),
                message: format!("no transfer session {id}"),
            });
        }
        state.record(format!("transfer_extend {id}"));
        Ok(())
    }

    async fn transfer_finalize(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(transfer) = state.transfers.get_mut(id) else {
            return Err(HerdError::RemoteOperation {
                operation: "transfer finalize".to_string(),
                message: format!("no transfer session {id}"),
            });
        };
        transfer.finalized = true;
        state.record(format!("transfer_finalize {id}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{DiskService, ImageTransferService, VmService};
    use diskherd_core::DiskFormat;

    fn image_def(name: &str, size: u64) -> DiskDef {
        DiskDef {
            name: Some(name.to_string()),
            description: None,
            format: DiskFormat::Cow,
            provisioned_size: Some(size),
            shareable: None,
            storage_domain: None,
            lun: None,
        }
    }

    #[tokio::test]
    async fn add_and_search_disks() {
        let engine = MemoryEngine::new();
        let disk = engine.disk_add(&image_def("data", 1024)).await.unwrap();

        assert!(engine.disk_lookup(&disk.id).await.unwrap().is_some());
        assert!(engine.disk_search("data").await.unwrap().is_some());
        assert!(engine.disk_search("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_storage_domain_is_rejected() {
        let engine = MemoryEngine::new();
        let mut def = image_def("data", 1024);
        def.storage_domain = Some("nowhere".to_string());

        let err = engine.disk_add(&def).await.unwrap_err();
        assert!(matches!(err, HerdError::ReferenceNotFound { .. }));
    }

    #[tokio::test]
    async fn removing_a_disk_detaches_it() {
        let engine = MemoryEngine::new();
        let vm = engine.seed_vm("vm1").await;
        let disk = engine.disk_add(&image_def("data", 1024)).await.unwrap();
        engine
            .attach_disk(
                &vm.id,
                &AttachmentDef {
                    disk_id: disk.id.clone(),
                    interface: Default::default(),
                    bootable: None,
                    active: true,
                },
            )
            .await
            .unwrap();

        engine.disk_remove(&disk.id).await.unwrap();
        assert!(engine.attachment_list(&vm.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transfer_phases_follow_behavior() {
        let engine = MemoryEngine::new();
        let session = engine.transfer_start("d1").await.unwrap();
        assert_eq!(session.phase, TransferPhase::Initializing);

        let session = engine.transfer_get(&session.id).await.unwrap();
        assert_eq!(session.phase, TransferPhase::Transferring);

        engine.transfer_finalize(&session.id).await.unwrap();
        let session = engine.transfer_get(&session.id).await.unwrap();
        assert_eq!(session.phase, TransferPhase::FinalizingSuccess);
        let session = engine.transfer_get(&session.id).await.unwrap();
        assert_eq!(session.phase, TransferPhase::FinishedSuccess);
    }
}
