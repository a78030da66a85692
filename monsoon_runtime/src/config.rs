//! Runtime configuration. Project and resource descriptions arrive
//! pre-parsed (the XML front-end is a collaborator); everything is
//! validated before any component starts.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use error_chain::bail;
use serde_derive::{Deserialize, Serialize};

use monsoon_core::errors::Result;
use monsoon_core::types::ResourceSpec;

use crate::scheduler::{ConnectorRegistry, SchedulerRegistry};

pub const ENV_HOME: &str = "MONSOON_HOME";
pub const ENV_PROJECT_FILE: &str = "MONSOON_PROJECT_FILE";
pub const ENV_RESOURCES_FILE: &str = "MONSOON_RESOURCES_FILE";
pub const ENV_SCHEDULER: &str = "MONSOON_SCHEDULER";
pub const ENV_CONNECTOR: &str = "MONSOON_CONNECTOR";
pub const ENV_EXTERNAL_ADAPTATION: &str = "MONSOON_EXTERNAL_ADAPTATION";

pub const DEFAULT_SCHEDULER: &str = "LoadBalancing";
pub const DEFAULT_CONNECTOR: &str = "Local";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedDiskMount {
    pub disk: String,
    pub host: String,
    pub mountpoint: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub master_host: String,

    #[serde(default)]
    pub mounts: Vec<SharedDiskMount>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            master_host: "localhost".to_string(),
            mounts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Installation root; working and staging directories live below it.
    pub home: PathBuf,
    pub scheduler: String,
    pub connector: String,
    pub external_adaptation: bool,
    pub project_file: Option<PathBuf>,
    pub resources_file: Option<PathBuf>,
    pub project: ProjectConfig,
    pub resources: Vec<ResourceSpec>,
    pub queue_capacity: usize,
    pub enable_event_log: bool,
}

impl RuntimeConfig {
    pub fn new<P: Into<PathBuf>>(home: P) -> RuntimeConfig {
        RuntimeConfig {
            home: home.into(),
            scheduler: DEFAULT_SCHEDULER.to_string(),
            connector: DEFAULT_CONNECTOR.to_string(),
            external_adaptation: false,
            project_file: None,
            resources_file: None,
            project: Default::default(),
            resources: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enable_event_log: false,
        }
    }

    /// Build a configuration from the recognized environment variables.
    /// Unrecognized variables are ignored.
    pub fn from_env() -> Result<RuntimeConfig> {
        let home = match env::var_os(ENV_HOME) {
            Some(home) => PathBuf::from(home),
            None => bail!("environment variable {} is not set", ENV_HOME),
        };
        let mut config = RuntimeConfig::new(home);
        if let Ok(scheduler) = env::var(ENV_SCHEDULER) {
            config.scheduler = scheduler;
        }
        if let Ok(connector) = env::var(ENV_CONNECTOR) {
            config.connector = connector;
        }
        if let Some(path) = env::var_os(ENV_PROJECT_FILE) {
            config.project_file = Some(PathBuf::from(path));
        }
        if let Some(path) = env::var_os(ENV_RESOURCES_FILE) {
            config.resources_file = Some(PathBuf::from(path));
        }
        if let Ok(flag) = env::var(ENV_EXTERNAL_ADAPTATION) {
            config.external_adaptation = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        Ok(config)
    }

    /// Schema validation, run before the core starts. A failure here
    /// aborts initialization.
    pub fn validate(
        &self,
        schedulers: &SchedulerRegistry,
        connectors: &ConnectorRegistry,
    ) -> Result<()> {
        if self.project.master_host.is_empty() {
            bail!("project configuration has no master host");
        }
        if self.queue_capacity == 0 {
            bail!("request queue capacity must be positive");
        }
        schedulers.create(&self.scheduler)?;
        connectors.create(&self.connector)?;
        let mut names = HashSet::new();
        for resource in self.resources.iter() {
            if !names.insert(&resource.name) {
                bail!("duplicate resource name '{}'", resource.name);
            }
            if resource.host.is_empty() {
                bail!("resource '{}' has no host", resource.name);
            }
            if resource.processors.is_empty() {
                bail!("resource '{}' declares no processors", resource.name);
            }
        }
        for mount in self.project.mounts.iter() {
            if mount.disk.is_empty() || mount.host.is_empty() {
                bail!("shared-disk mount with empty disk or host");
            }
            if !mount.mountpoint.is_absolute() {
                bail!(
                    "mount point {:?} of disk '{}' is not absolute",
                    mount.mountpoint,
                    mount.disk
                );
            }
        }
        Ok(())
    }
}
