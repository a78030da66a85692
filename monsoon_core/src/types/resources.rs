use std::collections::HashSet;

use serde_derive::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProcessorKind {
    Cpu,
    Gpu,
    Fpga,
    Other,
}

impl Default for ProcessorKind {
    fn default() -> Self {
        ProcessorKind::Cpu
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorSpec {
    pub name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub speed_ghz: f32,

    pub cores: u32,

    #[serde(default)]
    pub kind: ProcessorKind,
}

/// Static description of one worker resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    pub name: String,

    pub host: String,

    pub processors: Vec<ProcessorSpec>,

    #[serde(default)]
    pub memory_mb: u64,

    #[serde(default)]
    pub memory_virtual_mb: u64,

    #[serde(default)]
    pub storage_mb: u64,

    #[serde(skip_serializing_if = "String::is_empty")]
    #[serde(default)]
    pub operating_system: String,

    #[serde(skip_serializing_if = "HashSet::is_empty")]
    #[serde(default)]
    pub software: HashSet<String>,

    #[serde(skip_serializing_if = "HashSet::is_empty")]
    #[serde(default)]
    pub queues: HashSet<String>,

    #[serde(skip_serializing_if = "HashSet::is_empty")]
    #[serde(default)]
    pub images: HashSet<String>,
}

impl ResourceSpec {
    pub fn total_cores(&self) -> u32 {
        self.processors
            .iter()
            .filter(|p| p.kind == ProcessorKind::Cpu)
            .map(|p| p.cores)
            .sum()
    }

    pub fn gpu_count(&self) -> u32 {
        self.processors
            .iter()
            .filter(|p| p.kind == ProcessorKind::Gpu)
            .count() as u32
    }

    pub fn capacity(&self) -> Capacity {
        Capacity {
            cores: self.total_cores(),
            memory_mb: self.memory_mb,
            gpus: self.gpu_count(),
        }
    }
}

/// Free-capacity vector tracked per resource.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub cores: u32,
    pub memory_mb: u64,
    pub gpus: u32,
}

impl Capacity {
    pub fn add(&mut self, other: &Capacity) {
        self.cores += other.cores;
        self.memory_mb += other.memory_mb;
        self.gpus += other.gpus;
    }

    pub fn remove(&mut self, other: &Capacity) {
        assert!(self.fits(other));
        self.cores -= other.cores;
        self.memory_mb -= other.memory_mb;
        self.gpus -= other.gpus;
    }

    #[inline]
    pub fn fits(&self, other: &Capacity) -> bool {
        other.cores <= self.cores && other.memory_mb <= self.memory_mb
            && other.gpus <= self.gpus
    }
}

#[inline]
fn default_core_count() -> u32 {
    1
}

/// Additive attribute predicates an implementation imposes on a resource.
/// A resource matches iff every present attribute is pointwise satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub processor_architecture: Option<String>,

    #[serde(default = "default_core_count")]
    pub processor_core_count: u32,

    #[serde(default)]
    pub gpu_count: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub memory_physical_mb: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub memory_virtual_mb: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub storage_size_mb: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub operating_system: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub app_software: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub host_queue: Option<String>,
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            processor_architecture: None,
            processor_core_count: default_core_count(),
            gpu_count: 0,
            memory_physical_mb: None,
            memory_virtual_mb: None,
            storage_size_mb: None,
            operating_system: None,
            app_software: Vec::new(),
            host_queue: None,
        }
    }
}

impl Constraints {
    /// Pointwise match against a resource description, ignoring the current
    /// load of the resource.
    pub fn satisfied_by(&self, r: &ResourceSpec) -> bool {
        if self.processor_core_count > r.total_cores() {
            return false;
        }
        if self.gpu_count > r.gpu_count() {
            return false;
        }
        if let Some(ref arch) = self.processor_architecture {
            if !r.processors.iter().any(|p| &p.architecture == arch) {
                return false;
            }
        }
        if let Some(mem) = self.memory_physical_mb {
            if mem > r.memory_mb {
                return false;
            }
        }
        if let Some(mem) = self.memory_virtual_mb {
            if mem > r.memory_virtual_mb {
                return false;
            }
        }
        if let Some(storage) = self.storage_size_mb {
            if storage > r.storage_mb {
                return false;
            }
        }
        if let Some(ref os) = self.operating_system {
            if os != &r.operating_system {
                return false;
            }
        }
        if !self.app_software.iter().all(|s| r.software.contains(s)) {
            return false;
        }
        if let Some(ref q) = self.host_queue {
            if !r.queues.contains(q) {
                return false;
            }
        }
        true
    }

    /// Multiply per-node numeric requirements by the processes-per-node
    /// count of a multi-node (MPI) implementation.
    pub fn scale_up_by(&self, ppn: u32) -> Constraints {
        let mut scaled = self.clone();
        scaled.processor_core_count *= ppn;
        scaled.gpu_count *= ppn;
        scaled.memory_physical_mb = self.memory_physical_mb.map(|m| m * ppn as u64);
        scaled.memory_virtual_mb = self.memory_virtual_mb.map(|m| m * ppn as u64);
        scaled
    }

    /// Capacity the scheduler must reserve while a task using this
    /// implementation runs.
    pub fn required_capacity(&self) -> Capacity {
        Capacity {
            cores: self.processor_core_count,
            memory_mb: self.memory_physical_mb.unwrap_or(0),
            gpus: self.gpu_count,
        }
    }
}
