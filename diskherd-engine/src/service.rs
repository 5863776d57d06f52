use async_trait::async_trait;
use diskherd_core::{
    AttachmentDef, Disk, DiskAttachment, DiskDef, Result, StorageDomain, TransferSession, Vm,
};

/// Disk collection CRUD plus the storage placement actions.
///
/// Lookups return `Ok(None)` for entities that simply do not exist; only
/// rejected requests surface as errors.
#[async_trait]
pub trait DiskService: Send + Sync {
    async fn disk_list(&self) -> Result<Vec<Disk>>;
    async fn disk_lookup(&self, id: &str) -> Result<Option<Disk>>;
    async fn disk_search(&self, name: &str) -> Result<Option<Disk>>;
    async fn disk_add(&self, def: &DiskDef) -> Result<Disk>;
    async fn disk_update(&self, id: &str, def: &DiskDef) -> Result<Disk>;
    async fn disk_remove(&self, id: &str) -> Result<()>;
    async fn disk_move(&self, id: &str, storage_domain_id: &str) -> Result<()>;
    async fn disk_copy(&self, id: &str, storage_domain_id: &str) -> Result<()>;
}

#[async_trait]
pub trait VmService: Send + Sync {
    async fn vm_lookup(&self, id: &str) -> Result<Option<Vm>>;
    async fn vm_search(&self, name: &str) -> Result<Option<Vm>>;
    async fn attachment_list(&self, vm_id: &str) -> Result<Vec<DiskAttachment>>;
    async fn attachment_lookup(&self, vm_id: &str, disk_id: &str)
    -> Result<Option<DiskAttachment>>;
    async fn attach_disk(&self, vm_id: &str, def: &AttachmentDef) -> Result<DiskAttachment>;
    async fn update_attachment(
        &self,
        vm_id: &str,
        attachment_id: &str,
        def: &AttachmentDef,
    ) -> Result<DiskAttachment>;
    async fn detach_disk(&self, vm_id: &str, attachment_id: &str) -> Result<()>;
}

#[async_trait]
pub trait StorageDomainService: Send + Sync {
    async fn storage_domain_search(&self, name: &str) -> Result<Option<StorageDomain>>;
}

/// Image transfer session lifecycle. One session per upload attempt.
#[async_trait]
pub trait ImageTransferService: Send + Sync {
    async fn transfer_start(&self, disk_id: &str) -> Result<TransferSession>;
    async fn transfer_get(&self, id: &str) -> Result<TransferSession>;
    /// Keep-alive; resets the session's idle expiry.
    async fn transfer_extend(&self, id: &str) -> Result<()>;
    async fn transfer_finalize(&self, id: &str) -> Result<()>;
}

/// Everything the reconcilers and the uploader need from the engine.
pub trait Engine:
    DiskService + VmService + StorageDomainService + ImageTransferService
{
}

impl<T> Engine for T where
    T: DiskService + VmService + StorageDomainService + ImageTransferService
{
}
