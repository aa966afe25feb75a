//! Standard filters for [`VolumeStore::prune`](crate::VolumeStore::prune).

use std::collections::HashSet;
use std::convert::Infallible;

use crate::volume::Volume;

/// Selects volumes no container uses.
///
/// With `all` unset only anonymous volumes qualify, so named volumes survive a
/// plain prune.
pub fn unused_volumes(
    in_use: &HashSet<String>,
    all: bool,
) -> impl FnOnce(Vec<Volume>) -> Result<Vec<String>, Infallible> + '_ {
    move |volumes| {
        Ok(volumes
            .into_iter()
            .filter(|volume| !in_use.contains(&volume.name))
            .filter(|volume| all || volume.is_anonymous())
            .map(|volume| volume.name)
            .collect())
    }
}
