use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Label marking a volume created without an explicit name.
pub const ANONYMOUS_LABEL: &str = "ctrstate/anonymous-volume";

/// Directory holding a volume's payload; this is its mountpoint.
pub const DATA_DIR_NAME: &str = "_data";

/// File holding a volume's persisted metadata.
pub const METADATA_FILE_NAME: &str = "volume.json";

/// A volume as reported to callers.
///
/// Only `labels` is persisted. `mountpoint` is derived from the name on every
/// read, and `size` is computed on request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    pub mountpoint: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Volume {
    pub fn is_anonymous(&self) -> bool {
        self.labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(ANONYMOUS_LABEL))
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.as_ref()?.get(key).map(String::as_str)
    }
}

/// Contents of `volume.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct VolumeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) labels: Option<HashMap<String, String>>,
}
