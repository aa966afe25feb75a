//! Lock guards and the operations that require them.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use fs4::FileExt;

use crate::error::Error;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

enum InProcessGuard<'a> {
    // Held only for their drop.
    Shared(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// A held lock on a [`Store`].
///
/// Content operations (`get`, `set`, `delete`, `list`, `group_*`) are only
/// reachable through a guard. Mutations additionally require
/// [`LockMode::Exclusive`]; attempting one through a shared guard is a
/// `FaultyImplementation` error.
///
/// Dropping the guard releases both lock layers. Use [`StoreLock::release`] to
/// observe a failure to drop the advisory lock.
pub struct StoreLock<'a> {
    store: &'a Store,
    mode: LockMode,
    file: Option<File>,
    _guard: InProcessGuard<'a>,
}

impl<'a> StoreLock<'a> {
    pub(crate) fn exclusive(
        store: &'a Store,
        guard: RwLockWriteGuard<'a, ()>,
    ) -> Result<StoreLock<'a>, Error> {
        let file = flock(store.root(), LockMode::Exclusive)?;
        Ok(StoreLock {
            store,
            mode: LockMode::Exclusive,
            file: Some(file),
            _guard: InProcessGuard::Exclusive(guard),
        })
    }

    pub(crate) fn shared(
        store: &'a Store,
        guard: RwLockReadGuard<'a, ()>,
    ) -> Result<StoreLock<'a>, Error> {
        let file = flock(store.root(), LockMode::Shared)?;
        Ok(StoreLock {
            store,
            mode: LockMode::Shared,
            file: Some(file),
            _guard: InProcessGuard::Shared(guard),
        })
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// The store this guard locks.
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// Releases both lock layers, reporting a failure to drop the advisory
    /// lock.
    pub fn release(mut self) -> Result<(), Error> {
        // `file` is only taken here and in `drop`, and both consume the guard.
        self.file
            .take()
            .map_or(Ok(()), |file| unlock(&file, self.store.root()))
    }

    /// Reads the value at `key`.
    pub fn get(&self, key: &[&str]) -> Result<Vec<u8>, Error> {
        let path = self.store.location(key)?;
        let metadata = stat(&path, key)?;
        if metadata.is_dir() {
            return Err(Error::faulty(format!(
                "cannot read {:?}: it is a group, not a value",
                key
            )));
        }

        log::debug!("Reading {}...", path.display());
        fs::read(&path)
            .map_err(|error| Error::system(format!("failed to read {}", path.display()), error))
    }

    /// Writes `data` at `key`, creating parent groups as needed.
    ///
    /// The value is written to a temporary file next to its destination and
    /// renamed into place, so readers see either the old value or the new one.
    /// A crash before the rename can leave a `.tmp-*` file behind, and rename
    /// atomicity depends on the underlying filesystem.
    pub fn set(&self, data: &[u8], key: &[&str]) -> Result<(), Error> {
        self.require_exclusive("set")?;
        let path = self.store.location(key)?;
        let parent = parent_of(&path, key)?;

        if path.is_dir() {
            return Err(Error::faulty(format!(
                "cannot write {:?}: it is a group, not a value",
                key
            )));
        }

        self.store.create_dir_all(parent).map_err(|error| {
            Error::system(format!("failed to create {}", parent.display()), error)
        })?;

        log::debug!("Writing {}...", path.display());
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent)
            .map_err(|error| {
                Error::system(
                    format!("failed to create temporary file in {}", parent.display()),
                    error,
                )
            })?;

        let write_error =
            |error| Error::system(format!("failed to write {}", path.display()), error);
        tmp.write_all(data).map_err(write_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(self.store.file_perm()))
                .map_err(write_error)?;
        }
        tmp.as_file().sync_all().map_err(write_error)?;
        tmp.persist(&path)
            .map_err(|error| write_error(error.error))?;

        Ok(())
    }

    /// Removes the value or group at `key`.
    pub fn delete(&self, key: &[&str]) -> Result<(), Error> {
        self.require_exclusive("delete")?;
        if key.is_empty() {
            return Err(Error::invalid_argument("a key is required to delete"));
        }

        let path = self.store.location(key)?;
        let metadata = stat(&path, key)?;

        log::debug!("Deleting {}...", path.display());
        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed
            .map_err(|error| Error::system(format!("failed to delete {}", path.display()), error))
    }

    /// Lists the names directly under `key`, sorted. An empty key lists the
    /// store root.
    pub fn list(&self, key: &[&str]) -> Result<Vec<String>, Error> {
        let path = self.store.location(key)?;
        let metadata = stat(&path, key)?;
        if !metadata.is_dir() {
            return Err(Error::faulty(format!(
                "cannot list {:?}: it is a value, not a group",
                key
            )));
        }

        let read_error =
            |error| Error::system(format!("failed to list {}", path.display()), error);
        let mut names = Vec::new();
        for entry in fs::read_dir(&path).map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => log::warn!(
                    "Skipping non UTF-8 entry {:?} in {}",
                    name,
                    path.display()
                ),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Same as [`Store::exists`], for callers already holding a guard.
    pub fn exists(&self, key: &[&str]) -> Result<bool, Error> {
        self.store.exists(key)
    }

    pub fn location(&self, key: &[&str]) -> Result<PathBuf, Error> {
        self.store.location(key)
    }

    /// Creates the group at `key` and any missing parents.
    pub fn group_ensure(&self, key: &[&str]) -> Result<(), Error> {
        self.require_exclusive("create group")?;
        let path = self.store.location(key)?;
        if path.exists() && !path.is_dir() {
            return Err(Error::faulty(format!(
                "cannot create group {:?}: a value is stored there",
                key
            )));
        }

        self.store
            .create_dir_all(&path)
            .map_err(|error| Error::system(format!("failed to create {}", path.display()), error))
    }

    /// Sums the sizes of all regular files under `key`.
    pub fn group_size(&self, key: &[&str]) -> Result<u64, Error> {
        let path = self.store.location(key)?;
        stat(&path, key)?;

        let mut size = 0;
        for entry in walkdir::WalkDir::new(&path) {
            let entry = entry.map_err(|error| {
                Error::system(
                    format!("failed to walk {}", path.display()),
                    io::Error::from(error),
                )
            })?;
            if entry.file_type().is_file() {
                let metadata = entry.metadata().map_err(|error| {
                    Error::system(
                        format!("failed to stat {}", entry.path().display()),
                        io::Error::from(error),
                    )
                })?;
                size += metadata.len();
            }
        }
        Ok(size)
    }

    fn require_exclusive(&self, operation: &str) -> Result<(), Error> {
        match self.mode {
            LockMode::Exclusive => Ok(()),
            LockMode::Shared => Err(Error::faulty(format!(
                "cannot {} while holding a shared lock",
                operation
            ))),
        }
    }
}

impl Drop for StoreLock<'_> {
    fn drop(&mut self) {
        // The advisory lock goes first; the in-process guard drops after this.
        if let Some(file) = self.file.take() {
            if let Err(error) = unlock(&file, self.store.root()) {
                log::warn!("{}", error);
            }
        }
    }
}

impl std::fmt::Debug for StoreLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("root", &self.store.root())
            .field("mode", &self.mode)
            .finish()
    }
}

fn flock(root: &Path, mode: LockMode) -> Result<File, Error> {
    let file = File::open(root).map_err(|error| {
        Error::system(
            format!("failed to open {} for locking", root.display()),
            error,
        )
    })?;

    let locked = match mode {
        LockMode::Shared => FileExt::lock_shared(&file),
        LockMode::Exclusive => FileExt::lock_exclusive(&file),
    };
    locked.map_err(|error| {
        Error::system(
            format!("failed to take {:?} lock on {}", mode, root.display()),
            error,
        )
    })?;

    Ok(file)
}

fn unlock(file: &File, root: &Path) -> Result<(), Error> {
    FileExt::unlock(file)
        .map_err(|error| Error::system(format!("failed to unlock {}", root.display()), error))
}

fn stat(path: &Path, key: &[&str]) -> Result<fs::Metadata, Error> {
    fs::metadata(path).map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            Error::not_found(format!("{:?} does not exist", key))
        } else {
            Error::system(format!("failed to stat {}", path.display()), error)
        }
    })
}

fn parent_of<'p>(path: &'p Path, key: &[&str]) -> Result<&'p Path, Error> {
    if key.is_empty() {
        return Err(Error::invalid_argument("a key is required to set a value"));
    }
    path.parent()
        .ok_or_else(|| Error::faulty(format!("{} has no parent", path.display())))
}
