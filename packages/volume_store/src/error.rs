//! Error types for the volume store.
//!
//! Every error produced here displays with a `volume store error:` prefix and
//! is an [`Error`], so callers can tell volume store failures apart from their
//! own without matching on each kind.

pub use ctrstate_store::ErrorKind;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("volume store error: {0}")]
    Store(#[from] ctrstate_store::Error),

    #[error("volume store error: malformed metadata for volume {name:?}: {source}")]
    Metadata {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// A caller-supplied generator or filter failed.
    #[error("volume store error: {0}")]
    Callback(#[source] BoxError),
}

impl Error {
    /// The store error kind, if this error has one.
    ///
    /// Malformed metadata counts as a `SystemFailure`. Callback failures are
    /// the caller's own and carry no kind.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Store(e) => Some(e.kind()),
            Error::Metadata { .. } => Some(ErrorKind::SystemFailure),
            Error::Callback(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(ErrorKind::NotFound)
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == Some(ErrorKind::InvalidArgument)
    }

    pub(crate) fn volume_not_found(name: &str) -> Self {
        Error::Store(ctrstate_store::Error::not_found(format!(
            "volume {:?} does not exist",
            name
        )))
    }

    pub(crate) fn callback(error: impl Into<BoxError>) -> Self {
        Error::Callback(error.into())
    }
}

impl From<ctrstate_identifiers::Error> for Error {
    fn from(e: ctrstate_identifiers::Error) -> Self {
        Error::Store(e.into())
    }
}

/// Reports whether `err`, or anything in its source chain, came from the
/// volume store.
pub fn is_volume_store_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<Error>() || e.is::<RemovalError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// The result of a batch removal.
///
/// `warnings` holds per-name failures that did not stop the batch: invalid
/// names and volumes that do not exist.
#[derive(Debug, Default)]
pub struct Removal {
    pub removed: Vec<String>,
    pub warnings: Vec<Error>,
}

/// A batch removal that stopped early.
///
/// `removal` reports what was removed, and what was skipped, before `source`
/// aborted the batch.
#[derive(thiserror::Error, Debug)]
#[error("{source}")]
pub struct RemovalError {
    pub removal: Removal,
    #[source]
    pub source: Error,
}

impl From<Error> for RemovalError {
    fn from(source: Error) -> Self {
        RemovalError {
            removal: Removal::default(),
            source,
        }
    }
}

impl From<ctrstate_store::Error> for RemovalError {
    fn from(source: ctrstate_store::Error) -> Self {
        Error::from(source).into()
    }
}
