use std::fmt;
use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

use crate::errors::{ErrorKind, Result};

/// One physical location of a data instance.
///
/// A `Shared` path is relative to the mount point of the named disk and is
/// resolvable on every host mounting it; a `Private` path is absolute on a
/// single host; a `Persistent` entry lives in an external object store.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DataLocation {
    Private { host: String, path: PathBuf },
    Shared { disk: String, path: PathBuf },
    Persistent { id: String },
}

impl DataLocation {
    /// Parse a location URI: `file://<host><abs-path>`, `shared://<disk>/<rel-path>`
    /// or `psco://<id>`.
    pub fn parse(uri: &str) -> Result<DataLocation> {
        if let Some(rest) = strip_scheme(uri, "file://") {
            let slash = rest
                .find('/')
                .ok_or_else(|| ErrorKind::LocationInvalid(uri.to_string()))?;
            let (host, path) = rest.split_at(slash);
            if host.is_empty() || path.is_empty() {
                return Err(ErrorKind::LocationInvalid(uri.to_string()).into());
            }
            return Ok(DataLocation::Private {
                host: host.to_string(),
                path: PathBuf::from(path),
            });
        }
        if let Some(rest) = strip_scheme(uri, "shared://") {
            let slash = rest
                .find('/')
                .ok_or_else(|| ErrorKind::LocationInvalid(uri.to_string()))?;
            let (disk, path) = rest.split_at(slash);
            let path = &path[1..];
            if disk.is_empty() || path.is_empty() {
                return Err(ErrorKind::LocationInvalid(uri.to_string()).into());
            }
            return Ok(DataLocation::Shared {
                disk: disk.to_string(),
                path: PathBuf::from(path),
            });
        }
        if let Some(id) = strip_scheme(uri, "psco://") {
            if id.is_empty() {
                return Err(ErrorKind::LocationInvalid(uri.to_string()).into());
            }
            return Ok(DataLocation::Persistent { id: id.to_string() });
        }
        Err(ErrorKind::LocationInvalid(uri.to_string()).into())
    }

    #[inline]
    pub fn is_persistent(&self) -> bool {
        match *self {
            DataLocation::Persistent { .. } => true,
            _ => false,
        }
    }

    /// Stable key identifying the physical target of this location.
    pub fn location_key(&self) -> String {
        match *self {
            DataLocation::Private { ref host, ref path } => {
                format!("{}:private:{}", path.display(), host)
            }
            DataLocation::Shared { ref disk, ref path } => {
                format!("{}:shared:{}", path.display(), disk)
            }
            DataLocation::Persistent { ref id } => format!("{}:persistent", id),
        }
    }

    /// Whether `other` denotes the same physical target as this location.
    pub fn same_target(&self, other: &DataLocation) -> bool {
        match (self, other) {
            (
                &DataLocation::Shared { ref disk, ref path },
                &DataLocation::Shared {
                    disk: ref odisk,
                    path: ref opath,
                },
            ) => disk == odisk && path == opath,
            (
                &DataLocation::Private { ref host, ref path },
                &DataLocation::Private {
                    host: ref ohost,
                    path: ref opath,
                },
            ) => host == ohost && path == opath,
            (
                &DataLocation::Persistent { ref id },
                &DataLocation::Persistent { id: ref oid },
            ) => id == oid,
            _ => false,
        }
    }
}

fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    if uri.starts_with(scheme) {
        Some(&uri[scheme.len()..])
    } else {
        None
    }
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DataLocation::Private { ref host, ref path } => {
                write!(f, "file://{}{}", host, path.display())
            }
            DataLocation::Shared { ref disk, ref path } => {
                write!(f, "shared://{}/{}", disk, path.display())
            }
            DataLocation::Persistent { ref id } => write!(f, "psco://{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        let cases = [
            "file://node1/tmp/data/d1_v1",
            "shared://gpfs/apps/d2_v3",
            "psco://0bfa-33",
        ];
        for uri in cases.iter() {
            let loc = DataLocation::parse(uri).unwrap();
            assert_eq!(&format!("{}", loc), uri);
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        for uri in ["", "ftp://x/y", "file://hostonly", "shared://disk", "psco://"].iter() {
            assert!(DataLocation::parse(uri).is_err(), "accepted {:?}", uri);
        }
    }

    #[test]
    fn same_target_compares_both_sides() {
        let a = DataLocation::Shared {
            disk: "gpfs".into(),
            path: PathBuf::from("x/f"),
        };
        let b = DataLocation::Shared {
            disk: "gpfs".into(),
            path: PathBuf::from("y/f"),
        };
        let c = DataLocation::Shared {
            disk: "gpfs".into(),
            path: PathBuf::from("x/f"),
        };
        // paths differ, so these are distinct targets
        assert!(!a.same_target(&b));
        assert!(a.same_target(&c));
        let p = DataLocation::Private {
            host: "n1".into(),
            path: PathBuf::from("/x/f"),
        };
        assert!(!a.same_target(&p));
    }
}
