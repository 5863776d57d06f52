use serde::{Deserialize, Serialize};

use crate::error::HerdError;

/// Live disk entity as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: DiskStatus,
    #[serde(default)]
    pub shareable: bool,
    pub storage: DiskStorage,
}

impl Disk {
    pub fn is_lun(&self) -> bool {
        matches!(self.storage, DiskStorage::Lun(_))
    }

    pub fn lun_id(&self) -> Option<&str> {
        match &self.storage {
            DiskStorage::Lun(lun) => Some(&lun.id),
            DiskStorage::Image { .. } => None,
        }
    }

    pub fn provisioned_size(&self) -> Option<u64> {
        match &self.storage {
            DiskStorage::Image {
                provisioned_size, ..
            } => Some(*provisioned_size),
            DiskStorage::Lun(_) => None,
        }
    }

    /// Domain id the image currently resides on. LUN disks have no placement.
    pub fn primary_storage_domain(&self) -> Option<&str> {
        match &self.storage {
            DiskStorage::Image {
                storage_domains, ..
            } => storage_domains.first().map(String::as_str),
            DiskStorage::Lun(_) => None,
        }
    }
}

/// Where a disk's bytes live: a managed image on file-based storage, or an
/// external logical unit passed straight through to the guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DiskStorage {
    Image {
        format: DiskFormat,
        provisioned_size: u64,
        /// Domain ids holding this image; the first entry is the primary
        /// placement.
        storage_domains: Vec<String>,
    },
    Lun(LogicalUnit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Raw,
    #[default]
    Cow,
}

impl DiskFormat {
    /// `cow` images are thin provisioned; `raw` images are preallocated.
    pub fn sparse(self) -> bool {
        matches!(self, DiskFormat::Cow)
    }
}

impl std::fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskFormat::Raw => write!(f, "raw"),
            DiskFormat::Cow => write!(f, "cow"),
        }
    }
}

impl std::str::FromStr for DiskFormat {
    type Err = HerdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(DiskFormat::Raw),
            "cow" => Ok(DiskFormat::Cow),
            other => Err(HerdError::Config(format!(
                "unknown disk format '{other}', expected 'raw' or 'cow'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskStatus {
    Ok,
    Locked,
    Illegal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiskInterface {
    #[default]
    Virtio,
    Ide,
    VirtioScsi,
}

impl std::fmt::Display for DiskInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskInterface::Virtio => write!(f, "virtio"),
            DiskInterface::Ide => write!(f, "ide"),
            DiskInterface::VirtioScsi => write!(f, "virtio_scsi"),
        }
    }
}

impl std::str::FromStr for DiskInterface {
    type Err = HerdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtio" => Ok(DiskInterface::Virtio),
            "ide" => Ok(DiskInterface::Ide),
            "virtio_scsi" => Ok(DiskInterface::VirtioScsi),
            other => Err(HerdError::Config(format!(
                "unknown disk interface '{other}', expected 'virtio', 'ide' or 'virtio_scsi'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Iscsi,
    Fcp,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Iscsi => write!(f, "iscsi"),
            StorageType::Fcp => write!(f, "fcp"),
        }
    }
}

impl std::str::FromStr for StorageType {
    type Err = HerdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iscsi" => Ok(StorageType::Iscsi),
            "fcp" => Ok(StorageType::Fcp),
            other => Err(HerdError::Config(format!(
                "unknown storage type '{other}', expected 'iscsi' or 'fcp'"
            ))),
        }
    }
}

/// Logical unit directly attached to a VM, bypassing managed storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalUnit {
    pub id: String,
    pub address: Option<String>,
    #[serde(default = "default_lun_port")]
    pub port: u16,
    /// iSCSI target IQN.
    pub target: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub storage_type: StorageType,
}

fn default_lun_port() -> u16 {
    3260
}

impl LogicalUnit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: None,
            port: default_lun_port(),
            target: None,
            username: None,
            password: None,
            storage_type: StorageType::default(),
        }
    }
}

/// Relation between a disk and a VM; its lifecycle is independent of the
/// disk's own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskAttachment {
    pub id: String,
    pub disk_id: String,
    pub interface: DiskInterface,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDomain {
    pub id: String,
    pub name: String,
}

/// Remote state machine tracking one in-progress image upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSession {
    pub id: String,
    pub phase: TransferPhase,
    pub signed_ticket: Option<String>,
    pub proxy_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Initializing,
    Transferring,
    FinalizingSuccess,
    FinalizingFailure,
    FinishedSuccess,
    FinishedFailure,
    Cancelled,
    Unknown,
}

impl TransferPhase {
    /// Terminal phases meaning the upload did not complete.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TransferPhase::Unknown
                | TransferPhase::FinishedFailure
                | TransferPhase::FinalizingFailure
                | TransferPhase::Cancelled
        )
    }
}

impl std::fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            TransferPhase::Initializing => "initializing",
            TransferPhase::Transferring => "transferring",
            TransferPhase::FinalizingSuccess => "finalizing_success",
            TransferPhase::FinalizingFailure => "finalizing_failure",
            TransferPhase::FinishedSuccess => "finished_success",
            TransferPhase::FinishedFailure => "finished_failure",
            TransferPhase::Cancelled => "cancelled",
            TransferPhase::Unknown => "unknown",
        };
        write!(f, "{phase}")
    }
}

/// Desired disk representation sent to the engine on create and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskDef {
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: DiskFormat,
    pub provisioned_size: Option<u64>,
    pub shareable: Option<bool>,
    /// Target storage domain, by name. The engine picks one when unset.
    pub storage_domain: Option<String>,
    pub lun: Option<LogicalUnit>,
}

impl DiskDef {
    pub fn sparse(&self) -> bool {
        self.format.sparse()
    }
}

/// Desired attachment representation. `active` is always set on creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDef {
    pub disk_id: String,
    pub interface: DiskInterface,
    pub bootable: Option<bool>,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cow_is_sparse_raw_is_preallocated() {
        assert!(DiskFormat::Cow.sparse());
        assert!(!DiskFormat::Raw.sparse());
    }

    #[test]
    fn format_round_trips_through_str() {
        assert_eq!("cow".parse::<DiskFormat>().unwrap(), DiskFormat::Cow);
        assert_eq!(DiskFormat::Raw.to_string(), "raw");
        assert!("qcow2".parse::<DiskFormat>().is_err());
    }

    #[test]
    fn failure_phases() {
        assert!(TransferPhase::Cancelled.is_failure());
        assert!(TransferPhase::Unknown.is_failure());
        assert!(TransferPhase::FinishedFailure.is_failure());
        assert!(TransferPhase::FinalizingFailure.is_failure());
        assert!(!TransferPhase::FinishedSuccess.is_failure());
        assert!(!TransferPhase::Transferring.is_failure());
    }

    #[test]
    fn lun_disk_has_no_size_or_placement() {
        let disk = Disk {
            id: "d1".to_string(),
            name: None,
            description: None,
            status: DiskStatus::Ok,
            shareable: false,
            storage: DiskStorage::Lun(LogicalUnit::new("1IET_000d0001")),
        };
        assert!(disk.is_lun());
        assert_eq!(disk.lun_id(), Some("1IET_000d0001"));
        assert_eq!(disk.provisioned_size(), None);
        assert_eq!(disk.primary_storage_domain(), None);
    }
}
