use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use diskherd_core::{
    DiskFormat, DiskInterface, DiskSpec, EngineConfig, LogicalUnit, Result, StorageType,
    TargetState,
};

#[derive(Parser, Debug)]
#[command(name = "diskherd")]
#[command(about = "Reconcile virtual machine disks against a virtualization engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Engine API URL; overrides the config file
    #[arg(long)]
    pub url: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long, env = "DISKHERD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Skip certificate validation and hostname verification
    #[arg(long)]
    pub insecure: bool,

    /// CA bundle for the engine API and the transfer proxy
    #[arg(long)]
    pub ca_file: Option<PathBuf>,

    #[arg(short, long, help = "Verbose output")]
    pub verbose: bool,

    #[arg(short, long, help = "Quiet output")]
    pub quiet: bool,

    /// Disk id to manage; either this or --name is required
    #[arg(long)]
    pub id: Option<String>,

    /// Disk name to manage
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub vm_id: Option<String>,

    #[arg(long)]
    pub vm_name: Option<String>,

    #[arg(long, default_value = "present")]
    pub state: TargetState,

    /// Disk size in IEC units, e.g. 10GiB; can only grow
    #[arg(long)]
    pub size: Option<String>,

    #[arg(long)]
    pub interface: Option<DiskInterface>,

    #[arg(long, default_value = "cow")]
    pub format: DiskFormat,

    #[arg(long)]
    pub description: Option<String>,

    /// Storage domain to create the disk on, or move it to
    #[arg(long)]
    pub storage_domain: Option<String>,

    /// Storage domains to copy the disk to, every run
    #[arg(long = "storage-domains", value_delimiter = ',')]
    pub storage_domains: Vec<String>,

    #[arg(long)]
    pub bootable: Option<bool>,

    #[arg(long)]
    pub shareable: Option<bool>,

    /// Local image to upload into the disk once created
    #[arg(long)]
    pub image_path: Option<PathBuf>,

    /// Re-upload the image even when the disk already exists
    #[arg(long)]
    pub force: bool,

    /// Do not wait for disks to settle after create/move/attach
    #[arg(long)]
    pub no_wait: bool,

    /// Seconds between polls of the engine
    #[arg(long, default_value_t = 3)]
    pub poll_interval: u64,

    /// Overall deadline in seconds for each wait
    #[arg(long, default_value_t = 180)]
    pub timeout: u64,

    /// Logical unit id for a direct LUN disk
    #[arg(long)]
    pub lun_id: Option<String>,

    /// Storage server address for an iSCSI LUN
    #[arg(long)]
    pub lun_address: Option<String>,

    #[arg(long, default_value_t = 3260)]
    pub lun_port: u16,

    /// iSCSI target IQN
    #[arg(long)]
    pub lun_target: Option<String>,

    /// CHAP username for the storage server
    #[arg(long)]
    pub lun_username: Option<String>,

    #[arg(long, env = "DISKHERD_LUN_PASSWORD", hide_env_values = true)]
    pub lun_password: Option<String>,

    #[arg(long, default_value = "iscsi")]
    pub lun_storage_type: StorageType,
}

impl Cli {
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.url {
            Some(url) => EngineConfig::new(url.clone()),
            None => EngineConfig::load()?,
        };
        if self.username.is_some() {
            config.username = self.username.clone();
        }
        if self.password.is_some() {
            config.password = self.password.clone();
        }
        if self.insecure {
            config.insecure = true;
        }
        if self.ca_file.is_some() {
            config.ca_file = self.ca_file.clone();
        }
        Ok(config)
    }

    pub fn disk_spec(&self) -> Result<DiskSpec> {
        let logical_unit = self.lun_id.as_ref().map(|id| LogicalUnit {
            id: id.clone(),
            address: self.lun_address.clone(),
            port: self.lun_port,
            target: self.lun_target.clone(),
            username: self.lun_username.clone(),
            password: self.lun_password.clone(),
            storage_type: self.lun_storage_type,
        });

        let spec = DiskSpec {
            id: self.id.clone(),
            name: self.name.clone(),
            vm_id: self.vm_id.clone(),
            vm_name: self.vm_name.clone(),
            state: self.state,
            size: self.size.clone(),
            interface: self.interface,
            format: self.format,
            description: self.description.clone(),
            storage_domain: self.storage_domain.clone(),
            storage_domains: self.storage_domains.clone(),
            bootable: self.bootable,
            shareable: self.shareable,
            logical_unit,
            image_path: self.image_path.clone(),
            force: self.force,
            wait: !self.no_wait,
            poll_interval: Duration::from_secs(self.poll_interval),
            timeout: Duration::from_secs(self.timeout),
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_invocation() {
        let cli = Cli::parse_from([
            "diskherd",
            "--url",
            "https://engine.example.com/api",
            "--name",
            "d1",
            "--size",
            "10GiB",
        ]);
        let spec = cli.disk_spec().unwrap();
        assert_eq!(spec.name.as_deref(), Some("d1"));
        assert_eq!(spec.state, TargetState::Present);
        assert_eq!(spec.format, DiskFormat::Cow);
        assert!(spec.wait);
    }

    #[test]
    fn builds_a_logical_unit_from_flags() {
        let cli = Cli::parse_from([
            "diskherd",
            "--url",
            "https://engine.example.com/api",
            "--lun-id",
            "1IET_000d0001",
            "--lun-address",
            "10.34.63.204",
            "--lun-target",
            "iqn.2016-08-09.example:target",
        ]);
        let spec = cli.disk_spec().unwrap();
        let lun = spec.logical_unit.expect("logical unit built");
        assert_eq!(lun.id, "1IET_000d0001");
        assert_eq!(lun.port, 3260);
        assert_eq!(lun.storage_type, StorageType::Iscsi);
    }

    #[test]
    fn rejects_a_spec_without_identifier() {
        let cli = Cli::parse_from(["diskherd", "--url", "https://engine.example.com/api"]);
        assert!(cli.disk_spec().is_err());
    }
}
