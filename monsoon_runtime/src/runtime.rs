//! Explicit construction and teardown of the runtime: the two process-wide
//! singletons (access processor and shared-disk registry) plus every
//! component they depend on, wired in dependency order.

use std::fs;
use std::sync::{Arc, Mutex};

use log::info;

use monsoon_core::comm::Invoker;
use monsoon_core::errors::Result;
use monsoon_core::logging::{EventLog, NullLog, SqliteLog};
use monsoon_core::types::{AppId, ResourceSpec};

use crate::ap::processor::{AccessProcessor, ApComponents};
use crate::config::RuntimeConfig;
use crate::data::{FileOps, LogicalDataStore, SharedDiskRegistry, TransferManager};
use crate::resources::ResourcePool;
use crate::scheduler::{ConnectorRegistry, SchedulerRegistry};

pub struct Runtime {
    ap: AccessProcessor,
    pool: Arc<ResourcePool>,
    store: Arc<LogicalDataStore>,
    disks: Arc<SharedDiskRegistry>,
    fileops: Arc<FileOps>,
    logger: Arc<Mutex<Box<dyn EventLog>>>,
    master_host: String,
}

impl Runtime {
    /// Start with the built-in scheduler and connector registries.
    pub fn start(config: RuntimeConfig, invoker: Box<dyn Invoker>) -> Result<Runtime> {
        let schedulers = SchedulerRegistry::with_defaults();
        let connectors = ConnectorRegistry::with_defaults();
        Runtime::start_with(config, invoker, &schedulers, &connectors)
    }

    pub fn start_with(
        config: RuntimeConfig,
        invoker: Box<dyn Invoker>,
        schedulers: &SchedulerRegistry,
        connectors: &ConnectorRegistry,
    ) -> Result<Runtime> {
        config.validate(schedulers, connectors)?;
        info!(
            "starting runtime v{} with scheduler {}",
            ::monsoon_core::VERSION,
            config.scheduler
        );

        let disks = Arc::new(SharedDiskRegistry::new());
        for mount in config.project.mounts.iter() {
            disks.add_mount(&mount.disk, &mount.host, mount.mountpoint.clone());
        }

        let store = Arc::new(LogicalDataStore::new());
        let fileops = Arc::new(FileOps::new());

        let logger: Arc<Mutex<Box<dyn EventLog>>> = if config.enable_event_log {
            let log_dir = config.home.join("log");
            fs::create_dir_all(&log_dir)?;
            Arc::new(Mutex::new(Box::new(SqliteLog::new(&log_dir)?)))
        } else {
            Arc::new(Mutex::new(Box::new(NullLog)))
        };

        let master_host = config.project.master_host.clone();
        let backend = connectors.create(&config.connector)?;
        let transfers = Arc::new(TransferManager::new(
            store.clone(),
            disks.clone(),
            fileops.clone(),
            backend,
            logger.clone(),
            master_host.clone(),
        ));

        let pool = Arc::new(ResourcePool::new(config.home.join("work")));
        for spec in config.resources.iter() {
            pool.add(spec.clone())?;
        }

        let policy = schedulers.create(&config.scheduler)?;
        let open_dir = config.home.join("tmp");
        fs::create_dir_all(&open_dir)?;

        let ap = AccessProcessor::start(ApComponents {
            policy,
            invoker,
            pool: pool.clone(),
            store: store.clone(),
            disks: disks.clone(),
            transfers,
            fileops: fileops.clone(),
            logger: logger.clone(),
            master_host: master_host.clone(),
            open_dir,
            queue_capacity: config.queue_capacity,
        });

        Ok(Runtime {
            ap,
            pool,
            store,
            disks,
            fileops,
            logger,
            master_host,
        })
    }

    pub fn ap(&self) -> &AccessProcessor {
        &self.ap
    }

    pub fn store(&self) -> &Arc<LogicalDataStore> {
        &self.store
    }

    pub fn shared_disks(&self) -> &Arc<SharedDiskRegistry> {
        &self.disks
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    pub fn master_host(&self) -> &str {
        &self.master_host
    }

    /// Lifecycle entry points for scale-up/scale-down collaborators.
    pub fn add_resource(&self, spec: ResourceSpec) -> Result<()> {
        self.ap.add_resource(spec)
    }

    pub fn remove_resource(&self, name: &str) -> Result<()> {
        self.ap.remove_resource(name)
    }

    pub fn cancel_app(&self, app: AppId) -> Result<()> {
        self.ap.cancel_app(app)
    }

    /// Ordered teardown: serializer first, then the I/O lanes; the final
    /// event-log flush is fire-and-forget.
    pub fn shutdown(self) {
        info!("runtime shutting down");
        self.ap.shutdown();
        self.fileops.shutdown();
        self.logger.lock().unwrap().flush();
    }
}
