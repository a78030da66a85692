//! Named-constructor registries for the pluggable pieces. Populated once
//! at startup; an unknown name is a startup error, never a runtime
//! surprise.

use std::collections::HashMap;

use monsoon_core::comm::{LocalBackend, SshBackend, TransferBackend};
use monsoon_core::errors::{ErrorKind, Result};

use super::policy::{
    DataLocalityPolicy, FifoPolicy, LifoPolicy, LoadBalancingPolicy, SchedulingPolicy,
};

pub struct SchedulerRegistry {
    ctors: HashMap<String, fn() -> Box<dyn SchedulingPolicy>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        SchedulerRegistry {
            ctors: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, ctor: fn() -> Box<dyn SchedulingPolicy>) {
        self.ctors.insert(name.to_string(), ctor);
    }

    /// Registry with every built-in selector value.
    pub fn with_defaults() -> Self {
        let mut reg = SchedulerRegistry::new();
        reg.register("LoadBalancing", || Box::new(LoadBalancingPolicy));
        reg.register("FIFO", || Box::new(FifoPolicy));
        reg.register("LIFO", || Box::new(LifoPolicy));
        reg.register("FIFODataLocation", || Box::new(DataLocalityPolicy));
        // historical aliases
        reg.register("FIFOData", || Box::new(FifoPolicy));
        reg.register("Base", || Box::new(FifoPolicy));
        reg
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn SchedulingPolicy>> {
        match self.ctors.get(name) {
            Some(ctor) => Ok(ctor()),
            None => Err(ErrorKind::UnknownScheduler(name.to_string()).into()),
        }
    }
}

pub struct ConnectorRegistry {
    ctors: HashMap<String, fn() -> Box<dyn TransferBackend>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        ConnectorRegistry {
            ctors: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, ctor: fn() -> Box<dyn TransferBackend>) {
        self.ctors.insert(name.to_string(), ctor);
    }

    pub fn with_defaults() -> Self {
        let mut reg = ConnectorRegistry::new();
        reg.register("DefaultSSHConnector", || Box::new(SshBackend));
        reg.register("Local", || Box::new(LocalBackend));
        reg
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn TransferBackend>> {
        match self.ctors.get(name) {
            Some(ctor) => Ok(ctor()),
            None => Err(ErrorKind::UnknownConnector(name.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_selector_value_resolves() {
        let reg = SchedulerRegistry::with_defaults();
        for name in [
            "LoadBalancing",
            "FIFO",
            "LIFO",
            "FIFOData",
            "FIFODataLocation",
            "Base",
        ]
        .iter()
        {
            assert!(reg.create(name).is_ok(), "selector {} missing", name);
        }
    }

    #[test]
    fn unknown_names_are_startup_errors() {
        let reg = SchedulerRegistry::with_defaults();
        let err = reg.create("Fancy2000").unwrap_err();
        match *err.kind() {
            ErrorKind::UnknownScheduler(ref n) => assert_eq!(n, "Fancy2000"),
            ref other => panic!("unexpected error {:?}", other),
        }
        let cr = ConnectorRegistry::with_defaults();
        assert!(cr.create("DefaultSSHConnector").is_ok());
        assert!(cr.create("TeleportConnector").is_err());
    }
}
