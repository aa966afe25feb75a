//! Local, namespace-scoped volumes.
//!
//! A [`VolumeStore`] keeps one directory per volume under
//! `<data_root>/<address hash>/volumes/<namespace>`:
//!
//! ```text
//! <volume name>/
//!     volume.json   {"labels": {...}}
//!     _data/        the volume's mountpoint
//! ```
//!
//! Creation, removal and pruning run under the store's exclusive lock, which
//! also excludes other processes working on the same directory.
//!
//! ```rust
//! use std::collections::HashMap;
//! use ctrstate_volume_store::VolumeStore;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let volumes = VolumeStore::new(dir.path(), "default").unwrap();
//!
//! let labels = HashMap::from([("env".to_string(), "prod".to_string())]);
//! let created = volumes.create("v1", Some(labels)).unwrap();
//! assert!(created.mountpoint.is_dir());
//!
//! let removal = volumes
//!     .remove(|| Ok::<_, std::convert::Infallible>(vec!["v1".to_string()]))
//!     .unwrap();
//! assert_eq!(removal.removed, vec!["v1"]);
//! ```

pub mod config;
mod error;
pub mod labels;
pub mod prune;
mod volume;
mod volume_store;

pub use config::Config;
pub use ctrstate_store::StoreLock;
pub use error::{is_volume_store_error, Error, ErrorKind, Removal, RemovalError};
pub use volume::{Volume, ANONYMOUS_LABEL, DATA_DIR_NAME, METADATA_FILE_NAME};
pub use volume_store::{VolumeStore, VOLUME_DIR_PERM, VOLUME_FILE_PERM};
