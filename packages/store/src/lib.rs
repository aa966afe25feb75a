//! A directory tree used as a lock-disciplined key/value store.
//!
//! Keys are slices of path-safe string components and values are opaque
//! bytes. Content is only reachable through a [`StoreLock`], taken with
//! [`Store::lock`] (exclusive) or [`Store::read_only_lock`] (shared). The lock
//! has two layers: an in-process `RwLock` and an advisory `flock(2)` on the
//! store root, so threads and separate processes are both serialized.
//!
//! ```rust
//! use ctrstate_store::{Store, DEFAULT_DIR_PERM, DEFAULT_FILE_PERM};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = Store::new(dir.path(), DEFAULT_DIR_PERM, DEFAULT_FILE_PERM).unwrap();
//!
//! store
//!     .with_lock(|lock| lock.set(b"hello", &["greeting"]))
//!     .unwrap();
//!
//! let value = store
//!     .with_read_only_lock(|lock| lock.get(&["greeting"]))
//!     .unwrap();
//! assert_eq!(value, b"hello");
//! ```

mod error;
mod lock;
mod store;
mod transform;

pub use error::{find_store_error, is_store_error, Error, ErrorKind};
pub use lock::{LockMode, StoreLock};
pub use store::{Store, DEFAULT_DIR_PERM, DEFAULT_FILE_PERM};
pub use transform::{sha256_blocks, KeyTransform, BLOCK_SIZE};
