//! ctrstate: local persistent state for a Docker-compatible containerd client.
//!
//! Everything the client keeps on the host, rather than in containerd, goes
//! through two layers:
//!
//! - [`store`]: a directory tree used as a key/value store, guarded by a
//!   whole-store lock that excludes both threads and other processes.
//! - [`volume_store`]: named and anonymous volumes for one containerd
//!   namespace, built on a store.
//!
//! [`identifiers`] holds the naming rules both layers share.
//!
//! ```rust
//! use ctrstate::volume_store::VolumeStore;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let volumes = VolumeStore::new(dir.path(), "default").unwrap();
//! let anonymous = volumes.create("", None).unwrap();
//! assert!(anonymous.is_anonymous());
//! assert_eq!(volumes.count().unwrap(), 1);
//! ```

pub use ctrstate_identifiers as identifiers;
pub use ctrstate_store as store;
pub use ctrstate_volume_store as volume_store;
