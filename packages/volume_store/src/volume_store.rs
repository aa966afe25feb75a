use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use ctrstate_identifiers::{generate_id, validate_docker_compat, validate_path_component};
use ctrstate_store::{LockMode, Store, StoreLock};

use crate::config::Config;
use crate::error::{Error, Removal, RemovalError};
use crate::volume::{Volume, VolumeMetadata, ANONYMOUS_LABEL, DATA_DIR_NAME, METADATA_FILE_NAME};

pub const VOLUME_DIR_PERM: u32 = 0o755;
pub const VOLUME_FILE_PERM: u32 = 0o644;

type Labels = HashMap<String, String>;

/// Local volumes for one containerd namespace.
///
/// Each volume is a directory named after the volume, holding `volume.json`
/// (its labels) and `_data/` (its mountpoint). Every operation that reads or
/// changes more than one path runs under the store's exclusive lock, so other
/// callers only ever see a volume as absent or complete.
///
/// Locks are not reentrant: calling a locking method from the thread that
/// already holds the guard passed to [`VolumeStore::create_without_lock`]
/// deadlocks.
#[derive(Debug)]
pub struct VolumeStore {
    namespace: String,
    store: Store,
}

impl VolumeStore {
    /// Opens the store for `namespace` under `volumes_root`, creating it if
    /// needed.
    pub fn new(volumes_root: impl AsRef<Path>, namespace: &str) -> Result<VolumeStore, Error> {
        validate_path_component(namespace)?;
        let store = Store::new(
            volumes_root.as_ref().join(namespace),
            VOLUME_DIR_PERM,
            VOLUME_FILE_PERM,
        )?;

        Ok(VolumeStore {
            namespace: namespace.to_string(),
            store,
        })
    }

    /// Opens the store `config` points at.
    pub fn open(config: &Config) -> Result<VolumeStore, Error> {
        Self::new(config.volumes_root(), &config.namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The directory holding this namespace's volumes.
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Takes the exclusive lock, for batching [`VolumeStore::create_without_lock`]
    /// calls.
    pub fn lock(&self) -> Result<StoreLock<'_>, Error> {
        Ok(self.store.lock()?)
    }

    /// Creates a volume, or returns the existing one of the same name.
    ///
    /// An empty `name` creates an anonymous volume with a generated name. If
    /// the volume already exists its stored labels are kept and `labels` is
    /// ignored.
    pub fn create(&self, name: &str, labels: Option<Labels>) -> Result<Volume, Error> {
        let (name, labels) = resolve_name(name, labels)?;
        self.store
            .with_lock(|lock| self.create_locked(lock, &name, labels))
    }

    /// Same as [`VolumeStore::create`], under a lock the caller already holds.
    ///
    /// `lock` must be an exclusive guard taken from this store.
    pub fn create_without_lock(
        &self,
        lock: &StoreLock<'_>,
        name: &str,
        labels: Option<Labels>,
    ) -> Result<Volume, Error> {
        self.check_guard(lock)?;
        let (name, labels) = resolve_name(name, labels)?;
        self.create_locked(lock, &name, labels)
    }

    /// Reads a volume, optionally computing the size of its data.
    pub fn get(&self, name: &str, with_size: bool) -> Result<Volume, Error> {
        validate_docker_compat(name)?;
        self.store
            .with_lock(|lock| self.get_locked(lock, name, with_size))
    }

    /// Reads every volume in the namespace.
    ///
    /// Volumes that cannot be read are logged and left out.
    pub fn list(&self, with_size: bool) -> Result<BTreeMap<String, Volume>, Error> {
        self.store
            .with_lock(|lock| self.list_locked(lock, with_size))
    }

    /// Counts volumes without reading their metadata.
    pub fn count(&self) -> Result<usize, Error> {
        self.store.with_read_only_lock(|lock| {
            let names = lock.list(&[])?;
            Ok(names
                .iter()
                .filter(|name| validate_docker_compat(name).is_ok())
                .count())
        })
    }

    /// Checks whether a volume exists, without taking the lock.
    pub fn exists(&self, name: &str) -> Result<bool, Error> {
        validate_docker_compat(name)?;
        Ok(self.store.exists(&[name])?)
    }

    /// Removes the volumes named by `generator`.
    ///
    /// `generator` runs after the exclusive lock is taken and before it is
    /// released, so a decision such as "no container uses this volume" cannot
    /// be invalidated before the removal happens. Invalid and missing names
    /// become warnings; a failure to delete an existing volume stops the batch.
    pub fn remove<F, E>(&self, generator: F) -> Result<Removal, RemovalError>
    where
        F: FnOnce() -> Result<Vec<String>, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.with_removal_lock(|lock| {
            let names = generator().map_err(Error::callback)?;
            self.remove_locked(lock, &names)
        })
    }

    /// Removes the volumes `filter` selects from the full, unsized listing.
    ///
    /// Listing, filtering and removal all happen under one exclusive lock.
    pub fn prune<F, E>(&self, filter: F) -> Result<Removal, RemovalError>
    where
        F: FnOnce(Vec<Volume>) -> Result<Vec<String>, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.with_removal_lock(|lock| {
            let volumes = self.list_locked(lock, false)?.into_values().collect();
            let names = filter(volumes).map_err(Error::callback)?;
            self.remove_locked(lock, &names)
        })
    }

    fn check_guard(&self, lock: &StoreLock<'_>) -> Result<(), Error> {
        if !std::ptr::eq(lock.store(), &self.store) {
            return Err(ctrstate_store::Error::faulty(format!(
                "lock does not belong to the volume store for namespace {:?}",
                self.namespace
            ))
            .into());
        }
        if lock.mode() != LockMode::Exclusive {
            return Err(ctrstate_store::Error::faulty(
                "creating a volume requires an exclusive lock",
            )
            .into());
        }
        Ok(())
    }

    fn create_locked(
        &self,
        lock: &StoreLock<'_>,
        name: &str,
        labels: Option<Labels>,
    ) -> Result<Volume, Error> {
        if lock.exists(&[name])? {
            let volume = self.get_locked(lock, name, false)?;
            match labels.filter(|labels| !labels.is_empty()) {
                Some(labels) => log::warn!(
                    "Volume {:?} already exists in namespace {:?}; returning it as is and ignoring labels {:?}",
                    name,
                    self.namespace,
                    labels
                ),
                None => log::warn!(
                    "Volume {:?} already exists in namespace {:?}; returning it as is",
                    name,
                    self.namespace
                ),
            }
            return Ok(volume);
        }

        let metadata = VolumeMetadata { labels };
        let encoded = serde_json::to_vec(&metadata).map_err(|source| Error::Metadata {
            name: name.to_string(),
            source,
        })?;

        build_or_discard(lock, name, || {
            lock.group_ensure(&[name, DATA_DIR_NAME])?;
            lock.set(&encoded, &[name, METADATA_FILE_NAME])
        })?;

        log::debug!("Created volume {:?} in namespace {:?}", name, self.namespace);

        Ok(Volume {
            name: name.to_string(),
            mountpoint: lock.location(&[name, DATA_DIR_NAME])?,
            labels: metadata.labels,
            size: None,
        })
    }

    fn get_locked(
        &self,
        lock: &StoreLock<'_>,
        name: &str,
        with_size: bool,
    ) -> Result<Volume, Error> {
        if !lock.exists(&[name])? {
            return Err(Error::volume_not_found(name));
        }

        let encoded = lock.get(&[name, METADATA_FILE_NAME])?;
        let metadata: VolumeMetadata =
            serde_json::from_slice(&encoded).map_err(|source| Error::Metadata {
                name: name.to_string(),
                source,
            })?;

        let size = if with_size {
            Some(lock.group_size(&[name, DATA_DIR_NAME])?)
        } else {
            None
        };

        Ok(Volume {
            name: name.to_string(),
            mountpoint: lock.location(&[name, DATA_DIR_NAME])?,
            labels: metadata.labels,
            size,
        })
    }

    fn list_locked(
        &self,
        lock: &StoreLock<'_>,
        with_size: bool,
    ) -> Result<BTreeMap<String, Volume>, Error> {
        let mut volumes = BTreeMap::new();
        for name in lock.list(&[])? {
            if validate_docker_compat(&name).is_err() {
                log::debug!("Ignoring non-volume entry {:?} in {}", name, self.root().display());
                continue;
            }

            match self.get_locked(lock, &name, with_size) {
                Ok(volume) => {
                    volumes.insert(name, volume);
                }
                Err(error) => log::warn!("Skipping unreadable volume {:?}: {}", name, error),
            }
        }
        Ok(volumes)
    }

    fn remove_locked(
        &self,
        lock: &StoreLock<'_>,
        names: &[String],
    ) -> Result<Removal, RemovalError> {
        let mut removal = Removal::default();
        for name in names.iter().map(String::as_str) {
            if let Err(error) = validate_docker_compat(name) {
                removal.warnings.push(error.into());
                continue;
            }

            let exists = match lock.exists(&[name]) {
                Ok(exists) => exists,
                Err(error) => {
                    return Err(RemovalError {
                        removal,
                        source: error.into(),
                    })
                }
            };
            if !exists {
                removal.warnings.push(Error::volume_not_found(name));
                continue;
            }

            if let Err(error) = lock.delete(&[name]) {
                return Err(RemovalError {
                    removal,
                    source: error.into(),
                });
            }

            log::debug!("Removed volume {:?} from namespace {:?}", name, self.namespace);
            removal.removed.push(name.to_string());
        }
        Ok(removal)
    }

    fn with_removal_lock(
        &self,
        f: impl FnOnce(&StoreLock<'_>) -> Result<Removal, RemovalError>,
    ) -> Result<Removal, RemovalError> {
        let lock = self.store.lock()?;
        let result = f(&lock);
        match (result, lock.release()) {
            (result, Ok(())) => result,
            (Ok(removal), Err(release_error)) => Err(RemovalError {
                removal,
                source: release_error.into(),
            }),
            (Err(error), Err(release_error)) => {
                log::warn!(
                    "Failed to release volume store lock after a failed removal: {}",
                    release_error
                );
                Err(error)
            }
        }
    }
}

/// Creates the group `name` and fills it with `build`.
///
/// If `build` fails the whole group is deleted, so a volume directory exists
/// only with both its metadata and its data directory.
fn build_or_discard(
    lock: &StoreLock<'_>,
    name: &str,
    build: impl FnOnce() -> Result<(), ctrstate_store::Error>,
) -> Result<(), Error> {
    lock.group_ensure(&[name])?;
    if let Err(error) = build() {
        if let Err(cleanup_error) = lock.delete(&[name]) {
            log::warn!(
                "Failed to clean up partially created volume {:?}: {}",
                name,
                cleanup_error
            );
        }
        return Err(error.into());
    }
    Ok(())
}

/// Fills in a generated name and the anonymous label when `name` is empty,
/// then validates the name.
fn resolve_name(name: &str, labels: Option<Labels>) -> Result<(String, Option<Labels>), Error> {
    if !name.is_empty() {
        validate_docker_compat(name)?;
        return Ok((name.to_string(), labels));
    }

    let name = generate_id();
    validate_docker_compat(&name)?;
    let mut labels = labels.unwrap_or_default();
    labels.insert(ANONYMOUS_LABEL.to_string(), String::new());
    Ok((name, Some(labels)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrstate_store::ErrorKind;

    fn new_store() -> (tempfile::TempDir, VolumeStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(dir.path(), "default").unwrap();
        (dir, store)
    }

    #[test]
    fn namespace_must_be_path_safe() {
        let dir = tempfile::tempdir().unwrap();
        for namespace in ["", "..", "a/b"] {
            let err = VolumeStore::new(dir.path(), namespace).unwrap_err();
            assert!(err.is_invalid_argument(), "{:?}", namespace);
        }
    }

    #[test]
    fn namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let default = VolumeStore::new(dir.path(), "default").unwrap();
        let other = VolumeStore::new(dir.path(), "other").unwrap();

        default.create("shared-name", None).unwrap();
        assert!(default.exists("shared-name").unwrap());
        assert!(!other.exists("shared-name").unwrap());
        assert_eq!(other.count().unwrap(), 0);
    }

    #[test]
    fn create_writes_metadata_and_data_dir() {
        let (_dir, store) = new_store();
        let volume = store.create("v1", None).unwrap();

        let volume_dir = store.root().join("v1");
        assert!(volume_dir.join(METADATA_FILE_NAME).is_file());
        assert!(volume_dir.join(DATA_DIR_NAME).is_dir());
        assert_eq!(volume.mountpoint, volume_dir.join(DATA_DIR_NAME));
        assert_eq!(volume.labels, None);
    }

    #[test]
    fn resolve_name_marks_anonymous_volumes() {
        let (name, labels) = resolve_name("", None).unwrap();
        assert_eq!(name.len(), 64);
        assert_eq!(labels.unwrap()[ANONYMOUS_LABEL], "");

        let (name, labels) = resolve_name("named", None).unwrap();
        assert_eq!(name, "named");
        assert_eq!(labels, None);

        assert!(resolve_name("bad/name", None)
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn create_without_lock_batches_under_one_lock() {
        let (_dir, store) = new_store();
        let lock = store.lock().unwrap();
        let first = store.create_without_lock(&lock, "first", None).unwrap();
        let anonymous = store.create_without_lock(&lock, "", None).unwrap();
        lock.release().unwrap();

        assert_eq!(first.name, "first");
        assert!(anonymous.is_anonymous());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn create_without_lock_rejects_foreign_or_shared_guards() {
        let dir = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(dir.path(), "a").unwrap();
        let other = VolumeStore::new(dir.path(), "b").unwrap();

        let foreign = other.lock().unwrap();
        let err = store.create_without_lock(&foreign, "v1", None).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::FaultyImplementation));
        drop(foreign);

        let shared = store.store.read_only_lock().unwrap();
        let err = store.create_without_lock(&shared, "v1", None).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::FaultyImplementation));
    }

    #[test]
    fn failed_metadata_write_discards_the_volume_directory() {
        let (_dir, store) = new_store();
        let lock = store.lock().unwrap();

        // A group where the metadata value belongs makes the write fail after
        // the data directory already exists.
        let err = build_or_discard(&lock, "half", || {
            lock.group_ensure(&["half", DATA_DIR_NAME])?;
            lock.group_ensure(&["half", METADATA_FILE_NAME])?;
            lock.set(b"{}", &["half", METADATA_FILE_NAME])
        })
        .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::FaultyImplementation));
        assert!(!lock.exists(&["half"]).unwrap());
        lock.release().unwrap();

        assert_eq!(store.count().unwrap(), 0);
        let volume = store.create("half", None).unwrap();
        assert!(volume.mountpoint.is_dir());
        assert_eq!(store.list(false).unwrap().len(), 1);
    }

    #[test]
    fn failed_data_dir_creation_discards_the_volume_directory() {
        let (_dir, store) = new_store();
        let lock = store.lock().unwrap();

        let err = build_or_discard(&lock, "half", || {
            lock.set(b"", &["half", DATA_DIR_NAME])?;
            lock.group_ensure(&["half", DATA_DIR_NAME])
        })
        .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::FaultyImplementation));
        assert!(!lock.exists(&["half"]).unwrap());
    }

    #[test]
    fn successful_build_keeps_the_volume_directory() {
        let (_dir, store) = new_store();
        let lock = store.lock().unwrap();

        build_or_discard(&lock, "whole", || lock.group_ensure(&["whole", DATA_DIR_NAME]))
            .unwrap();
        assert_eq!(lock.list(&["whole"]).unwrap(), vec![DATA_DIR_NAME]);
    }

    #[test]
    fn missing_metadata_is_not_found() {
        let (_dir, store) = new_store();
        std::fs::create_dir_all(store.root().join("broken").join(DATA_DIR_NAME)).unwrap();

        assert!(store.get("broken", false).unwrap_err().is_not_found());
    }

    #[test]
    fn list_skips_unreadable_volumes() {
        let (_dir, store) = new_store();
        store.create("good", None).unwrap();

        let corrupt = store.root().join("corrupt");
        std::fs::create_dir_all(corrupt.join(DATA_DIR_NAME)).unwrap();
        std::fs::write(corrupt.join(METADATA_FILE_NAME), b"{not json").unwrap();

        let err = store.get("corrupt", false).unwrap_err();
        assert!(matches!(err, Error::Metadata { .. }));
        assert_eq!(err.kind(), Some(ErrorKind::SystemFailure));

        let volumes = store.list(false).unwrap();
        assert_eq!(volumes.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn stray_entries_are_not_volumes() {
        let (_dir, store) = new_store();
        store.create("real", None).unwrap();
        std::fs::write(store.root().join(".tmp-leftover"), b"").unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.list(false).unwrap().len(), 1);
    }

    #[test]
    fn generator_failure_aborts_without_removing() {
        let (_dir, store) = new_store();
        store.create("v1", None).unwrap();

        let err = store
            .remove(|| Err::<Vec<String>, _>("containerd unavailable"))
            .unwrap_err();
        assert!(matches!(err.source, Error::Callback(_)));
        assert!(err.removal.removed.is_empty());
        assert!(store.exists("v1").unwrap());
    }

    #[test]
    fn filter_failure_aborts_without_removing() {
        let (_dir, store) = new_store();
        store.create("v1", None).unwrap();

        let err = store
            .prune(|_| Err::<Vec<String>, _>("filter failed"))
            .unwrap_err();
        assert!(matches!(err.source, Error::Callback(_)));
        assert!(store.exists("v1").unwrap());
    }
}
