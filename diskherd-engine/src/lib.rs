mod http;
mod memory;
mod service;
mod wait;

pub use http::HttpEngine;
pub use memory::{MemoryEngine, TransferBehavior};
pub use service::{
    DiskService, Engine, ImageTransferService, StorageDomainService, VmService,
};
pub use wait::{poll_until, wait_for_disk_status, wait_until};
