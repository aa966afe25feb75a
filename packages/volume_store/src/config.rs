//! Where volume state lives on disk.
//!
//! Volumes for one containerd daemon and namespace live under
//! `<data_root>/<address hash>/volumes/<namespace>`. The address hash keeps
//! daemons listening on different sockets apart under a shared data root.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_ADDRESS: &str = "/run/containerd/containerd.sock";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const SYSTEM_DATA_ROOT: &str = "/var/lib/ctrstate";

pub const DATA_ROOT_ENV: &str = "CTRSTATE_DATA_ROOT";
pub const ADDRESS_ENV: &str = "CONTAINERD_ADDRESS";
pub const NAMESPACE_ENV: &str = "CONTAINERD_NAMESPACE";

/// Length of the address hash, in hex characters.
pub const ADDRESS_HASH_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_root: PathBuf,
    pub address: String,
    pub namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_root: default_data_root(),
            address: DEFAULT_ADDRESS.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl Config {
    /// The defaults, overridden by any of `CTRSTATE_DATA_ROOT`,
    /// `CONTAINERD_ADDRESS` and `CONTAINERD_NAMESPACE` that are set and
    /// non-empty.
    pub fn from_env() -> Config {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Config {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let mut config = Config::default();
        if let Some(data_root) = lookup(DATA_ROOT_ENV) {
            config.data_root = PathBuf::from(data_root);
        }
        if let Some(address) = lookup(ADDRESS_ENV) {
            config.address = address;
        }
        if let Some(namespace) = lookup(NAMESPACE_ENV) {
            config.namespace = namespace;
        }
        config
    }

    /// The directory holding one store per namespace for this daemon.
    pub fn volumes_root(&self) -> PathBuf {
        self.data_root
            .join(address_hash(&self.address))
            .join("volumes")
    }
}

/// Short digest of a containerd socket address.
pub fn address_hash(address: &str) -> String {
    let address = address.strip_prefix("unix://").unwrap_or(address);
    let mut digest = hex::encode(Sha256::digest(address.as_bytes()));
    digest.truncate(ADDRESS_HASH_LEN);
    digest
}

fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("ctrstate"))
        .unwrap_or_else(|| PathBuf::from(SYSTEM_DATA_ROOT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn address_hash_is_short_and_stable() {
        let hash = address_hash(DEFAULT_ADDRESS);
        assert_eq!(hash.len(), ADDRESS_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, address_hash(DEFAULT_ADDRESS));
        assert_ne!(hash, address_hash("/run/other/containerd.sock"));
    }

    #[test]
    fn unix_scheme_is_ignored() {
        assert_eq!(
            address_hash("unix:///run/containerd/containerd.sock"),
            address_hash("/run/containerd/containerd.sock")
        );
    }

    #[test]
    fn volumes_root_layout() {
        let config = Config {
            data_root: PathBuf::from("/data"),
            address: DEFAULT_ADDRESS.to_string(),
            namespace: "k8s.io".to_string(),
        };
        assert_eq!(
            config.volumes_root(),
            PathBuf::from("/data")
                .join(address_hash(DEFAULT_ADDRESS))
                .join("volumes")
        );
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars = HashMap::from([
            (DATA_ROOT_ENV, "/tmp/state"),
            (ADDRESS_ENV, ""),
            (NAMESPACE_ENV, "buildkit"),
        ]);
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.data_root, PathBuf::from("/tmp/state"));
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.namespace, "buildkit");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"namespace": "test"}"#).unwrap();
        assert_eq!(config.namespace, "test");
        assert_eq!(config.address, DEFAULT_ADDRESS);
    }
}
