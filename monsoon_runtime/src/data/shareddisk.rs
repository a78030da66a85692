use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use monsoon_core::types::DataLocation;

/// Central table of shared-disk mounts: `(disk, host) -> mount point`,
/// with index maps in both directions. Nothing here points at logical
/// data; the store keeps its own disk index.
#[derive(Default)]
struct MountTable {
    mounts: HashMap<(String, String), PathBuf>,
    by_disk: HashMap<String, HashSet<String>>,
    by_host: HashMap<String, HashSet<String>>,
}

/// Process-wide shared-disk topology. Reads dominate; the single lock is
/// held only for map lookups.
#[derive(Default)]
pub struct SharedDiskRegistry {
    table: Mutex<MountTable>,
}

impl SharedDiskRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_mount(&self, disk: &str, host: &str, mountpoint: PathBuf) {
        let mut t = self.table.lock().unwrap();
        t.mounts
            .insert((disk.to_string(), host.to_string()), mountpoint);
        t.by_disk
            .entry(disk.to_string())
            .or_insert_with(HashSet::new)
            .insert(host.to_string());
        t.by_host
            .entry(host.to_string())
            .or_insert_with(HashSet::new)
            .insert(disk.to_string());
    }

    pub fn remove_mount(&self, disk: &str, host: &str) {
        let mut t = self.table.lock().unwrap();
        t.mounts.remove(&(disk.to_string(), host.to_string()));
        if let Some(hosts) = t.by_disk.get_mut(disk) {
            hosts.remove(host);
        }
        if let Some(disks) = t.by_host.get_mut(host) {
            disks.remove(disk);
        }
    }

    /// Mount point of `disk` on `host`, if the host mounts it.
    pub fn mountpoint(&self, host: &str, disk: &str) -> Option<PathBuf> {
        let t = self.table.lock().unwrap();
        t.mounts.get(&(disk.to_string(), host.to_string())).cloned()
    }

    pub fn mounts_disk(&self, host: &str, disk: &str) -> bool {
        let t = self.table.lock().unwrap();
        t.mounts.contains_key(&(disk.to_string(), host.to_string()))
    }

    pub fn hosts_mounting(&self, disk: &str) -> Vec<String> {
        let t = self.table.lock().unwrap();
        t.by_disk
            .get(disk)
            .map(|hs| hs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn disks_on(&self, host: &str) -> Vec<String> {
        let t = self.table.lock().unwrap();
        t.by_host
            .get(host)
            .map(|ds| ds.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Any disk mounted by both hosts.
    pub fn common_disk(&self, host_a: &str, host_b: &str) -> Option<String> {
        let t = self.table.lock().unwrap();
        let a = t.by_host.get(host_a)?;
        let b = t.by_host.get(host_b)?;
        a.intersection(b).next().cloned()
    }

    /// Physical path of `location` as seen from `host`, when reachable
    /// without any transfer.
    pub fn resolve(&self, location: &DataLocation, host: &str) -> Option<PathBuf> {
        match *location {
            DataLocation::Private {
                host: ref h,
                ref path,
            } => {
                if h == host {
                    Some(path.clone())
                } else {
                    None
                }
            }
            DataLocation::Shared { ref disk, ref path } => {
                self.mountpoint(host, disk).map(|mp| mp.join(path))
            }
            DataLocation::Persistent { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> SharedDiskRegistry {
        let reg = SharedDiskRegistry::new();
        reg.add_mount("gpfs", "n1", PathBuf::from("/gpfs"));
        reg.add_mount("gpfs", "n2", PathBuf::from("/mnt/gpfs"));
        reg.add_mount("scratch", "n2", PathBuf::from("/scratch"));
        reg
    }

    #[test]
    fn mount_points_are_per_host() {
        let reg = topology();
        assert_eq!(reg.mountpoint("n1", "gpfs"), Some(PathBuf::from("/gpfs")));
        assert_eq!(
            reg.mountpoint("n2", "gpfs"),
            Some(PathBuf::from("/mnt/gpfs"))
        );
        assert_eq!(reg.mountpoint("n1", "scratch"), None);
    }

    #[test]
    fn indexes_stay_in_sync() {
        let reg = topology();
        let mut hosts = reg.hosts_mounting("gpfs");
        hosts.sort();
        assert_eq!(hosts, vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(reg.common_disk("n1", "n2"), Some("gpfs".to_string()));
        reg.remove_mount("gpfs", "n1");
        assert_eq!(reg.hosts_mounting("gpfs"), vec!["n2".to_string()]);
        assert_eq!(reg.common_disk("n1", "n2"), None);
    }

    #[test]
    fn resolve_shared_location() {
        let reg = topology();
        let loc = DataLocation::Shared {
            disk: "gpfs".into(),
            path: PathBuf::from("apps/d1_v1"),
        };
        assert_eq!(
            reg.resolve(&loc, "n2"),
            Some(PathBuf::from("/mnt/gpfs/apps/d1_v1"))
        );
        let private = DataLocation::Private {
            host: "n1".into(),
            path: PathBuf::from("/tmp/x"),
        };
        assert_eq!(reg.resolve(&private, "n2"), None);
    }
}
