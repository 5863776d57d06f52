use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HerdError, Result};
use crate::types::{DiskFormat, DiskInterface, LogicalUnit};

/// Declared desired state of one disk, as supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub vm_id: Option<String>,
    pub vm_name: Option<String>,
    #[serde(default)]
    pub state: TargetState,
    /// Size in IEC units, e.g. "10GiB". Can only grow once the disk exists.
    pub size: Option<String>,
    pub interface: Option<DiskInterface>,
    #[serde(default)]
    pub format: DiskFormat,
    pub description: Option<String>,
    /// Domain to create the disk on, or move it to if it lives elsewhere.
    pub storage_domain: Option<String>,
    /// Domains to copy the disk to, on every run.
    #[serde(default)]
    pub storage_domains: Vec<String>,
    pub bootable: Option<bool>,
    pub shareable: Option<bool>,
    pub logical_unit: Option<LogicalUnit>,
    /// Local image to upload into the disk once it is created.
    pub image_path: Option<PathBuf>,
    /// Re-upload the image even when the disk already exists.
    #[serde(default)]
    pub force: bool,
    /// When false, skip waiting for disks to settle after create/move/attach.
    #[serde(default = "default_wait")]
    pub wait: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

fn default_wait() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_timeout() -> Duration {
    Duration::from_secs(180)
}

impl Default for DiskSpec {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            vm_id: None,
            vm_name: None,
            state: TargetState::default(),
            size: None,
            interface: None,
            format: DiskFormat::default(),
            description: None,
            storage_domain: None,
            storage_domains: Vec::new(),
            bootable: None,
            shareable: None,
            logical_unit: None,
            image_path: None,
            force: false,
            wait: default_wait(),
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
        }
    }
}

impl DiskSpec {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_none() && self.name.is_none() && self.logical_unit.is_none() {
            return Err(HerdError::Config(
                "one of 'id', 'name' or 'logical_unit' is required".to_string(),
            ));
        }
        if let Some(lun) = &self.logical_unit {
            if lun.id.is_empty() {
                return Err(HerdError::Config(
                    "'logical_unit.id' must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn interface_or_default(&self) -> DiskInterface {
        self.interface.unwrap_or_default()
    }

    pub fn has_vm_reference(&self) -> bool {
        self.vm_id.is_some() || self.vm_name.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    #[default]
    Present,
    Absent,
    Attached,
    Detached,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetState::Present => write!(f, "present"),
            TargetState::Absent => write!(f, "absent"),
            TargetState::Attached => write!(f, "attached"),
            TargetState::Detached => write!(f, "detached"),
        }
    }
}

impl std::str::FromStr for TargetState {
    type Err = HerdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "present" => Ok(TargetState::Present),
            "absent" => Ok(TargetState::Absent),
            "attached" => Ok(TargetState::Attached),
            "detached" => Ok(TargetState::Detached),
            other => Err(HerdError::Config(format!(
                "unknown state '{other}', expected 'present', 'absent', 'attached' or 'detached'"
            ))),
        }
    }
}
