use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use ctrstate_identifiers::validate_path_component;

use crate::error::Error;
use crate::lock::StoreLock;
use crate::transform::KeyTransform;

/// Permission bits for directories created by a store.
pub const DEFAULT_DIR_PERM: u32 = 0o700;
/// Permission bits for files written by a store.
pub const DEFAULT_FILE_PERM: u32 = 0o600;

/// A directory tree used as a key/value store.
///
/// Keys are sequences of path-safe components; values are byte blobs. All
/// reads and writes of content go through a [`StoreLock`], which holds both an
/// in-process lock and an advisory `flock(2)` on the root directory, so
/// separate processes sharing the same root are serialized as well as threads
/// sharing this `Store`.
///
/// The lock covers the whole store, not individual keys.
pub struct Store {
    root: PathBuf,
    dir_perm: u32,
    file_perm: u32,
    transform: Option<KeyTransform>,
    mutex: RwLock<()>,
}

impl Store {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>, dir_perm: u32, file_perm: u32) -> Result<Store, Error> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(Error::invalid_argument("store root must not be empty"));
        }

        create_dir_all(&root, dir_perm).map_err(|error| {
            Error::system(
                format!("failed to create store root {}", root.display()),
                error,
            )
        })?;

        let root = root.canonicalize().map_err(|error| {
            Error::system(
                format!("failed to resolve store root {}", root.display()),
                error,
            )
        })?;

        log::debug!("Opened store at {}", root.display());

        Ok(Store {
            root,
            dir_perm,
            file_perm,
            transform: None,
            mutex: RwLock::new(()),
        })
    }

    /// Shards every key through `transform` before it touches the filesystem.
    #[must_use]
    pub fn with_transform(mut self, transform: KeyTransform) -> Store {
        self.transform = Some(transform);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn file_perm(&self) -> u32 {
        self.file_perm
    }

    /// Takes an exclusive lock on the whole store, blocking until it is free.
    pub fn lock(&self) -> Result<StoreLock<'_>, Error> {
        let guard = self.mutex.write().unwrap_or_else(PoisonError::into_inner);
        StoreLock::exclusive(self, guard)
    }

    /// Takes a shared lock on the whole store, blocking while an exclusive
    /// holder exists.
    pub fn read_only_lock(&self) -> Result<StoreLock<'_>, Error> {
        let guard = self.mutex.read().unwrap_or_else(PoisonError::into_inner);
        StoreLock::shared(self, guard)
    }

    /// Runs `f` under an exclusive lock.
    ///
    /// The lock is released on every exit path, including unwinding. If `f`
    /// succeeds but the release fails, the release error is returned.
    pub fn with_lock<T, E>(&self, f: impl FnOnce(&StoreLock<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<Error>,
    {
        let lock = self.lock()?;
        run_locked(lock, f)
    }

    /// Runs `f` under a shared lock. See [`Store::with_lock`].
    pub fn with_read_only_lock<T, E>(
        &self,
        f: impl FnOnce(&StoreLock<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<Error>,
    {
        let lock = self.read_only_lock()?;
        run_locked(lock, f)
    }

    /// Checks whether `key` exists without taking the lock.
    ///
    /// The answer may be stale by the time the caller acts on it.
    pub fn exists(&self, key: &[&str]) -> Result<bool, Error> {
        let path = self.location(key)?;
        match fs::symlink_metadata(&path) {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(Error::system(
                format!("failed to stat {}", path.display()),
                error,
            )),
        }
    }

    /// Resolves `key` to a path inside the store root.
    ///
    /// Every component is checked against the path component rule, before and
    /// after the transform, so the result can never leave the root. An empty
    /// key resolves to the root itself.
    pub fn location(&self, key: &[&str]) -> Result<PathBuf, Error> {
        for component in key {
            validate_path_component(component)?;
        }

        let components: Vec<String> = match self.transform {
            Some(transform) if !key.is_empty() => {
                let transformed = transform(key);
                for component in &transformed {
                    validate_path_component(component)?;
                }
                transformed
            }
            _ => key.iter().map(|c| c.to_string()).collect(),
        };

        Ok(components
            .iter()
            .fold(self.root.clone(), |path, component| path.join(component)))
    }

    pub(crate) fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        create_dir_all(path, self.dir_perm)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("dir_perm", &format_args!("{:o}", self.dir_perm))
            .field("file_perm", &format_args!("{:o}", self.file_perm))
            .field("sharded", &self.transform.is_some())
            .finish()
    }
}

fn run_locked<T, E>(
    lock: StoreLock<'_>,
    f: impl FnOnce(&StoreLock<'_>) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<Error>,
{
    let mode = lock.mode();
    let result = f(&lock);
    match (result, lock.release()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_error)) => Err(release_error.into()),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(release_error)) => {
            log::warn!(
                "Failed to release {:?} store lock after a failed operation: {}",
                mode,
                release_error
            );
            Err(error)
        }
    }
}

fn create_dir_all(path: &Path, dir_perm: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(dir_perm);
    }
    #[cfg(not(unix))]
    let _ = dir_perm;
    builder.create(path)
}
