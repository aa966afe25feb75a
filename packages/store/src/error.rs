//! Error types for the store.
//!
//! Every failure falls into one of four kinds. `FaultyImplementation` is
//! reserved for caller bugs (mutating through a shared lock, reading a
//! directory as a value, ...) and must never be reachable from user input.

use std::io;

/// The class of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    SystemFailure,
    FaultyImplementation,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("system failure: {message}: {source}")]
    SystemFailure {
        message: String,
        #[source]
        source: io::Error,
    },
    #[error("faulty implementation: {message}")]
    FaultyImplementation { message: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::SystemFailure { .. } => ErrorKind::SystemFailure,
            Error::FaultyImplementation { .. } => ErrorKind::FaultyImplementation,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>, source: io::Error) -> Self {
        Error::SystemFailure {
            message: message.into(),
            source,
        }
    }

    pub fn faulty(message: impl Into<String>) -> Self {
        Error::FaultyImplementation {
            message: message.into(),
        }
    }
}

impl From<ctrstate_identifiers::Error> for Error {
    fn from(e: ctrstate_identifiers::Error) -> Self {
        Error::InvalidArgument {
            message: e.to_string(),
        }
    }
}

/// Reports whether `err`, or anything in its source chain, is a store error.
pub fn is_store_error(err: &(dyn std::error::Error + 'static)) -> bool {
    find_store_error(err).is_some()
}

/// Finds the first store error in the source chain of `err`.
pub fn find_store_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a Error> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(store_error) = e.downcast_ref::<Error>() {
            return Some(store_error);
        }
        current = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("wrapped: {0}")]
    struct Wrapper(#[source] Error);

    #[test]
    fn kinds_match_variants() {
        assert_eq!(
            Error::invalid_argument("x").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::system("x", io::Error::other("disk")).kind(),
            ErrorKind::SystemFailure
        );
        assert_eq!(Error::faulty("x").kind(), ErrorKind::FaultyImplementation);
    }

    #[test]
    fn system_failure_display_includes_cause() {
        let e = Error::system("failed to write foo", io::Error::other("disk full"));
        let display = format!("{}", e);
        assert!(display.contains("failed to write foo"));
        assert!(display.contains("disk full"));
    }

    #[test]
    fn identifier_errors_become_invalid_argument() {
        let id_err = ctrstate_identifiers::validate_path_component("..").unwrap_err();
        let e: Error = id_err.into();
        assert!(e.is_invalid_argument());
    }

    #[test]
    fn store_errors_are_found_through_wrappers() {
        let wrapped = Wrapper(Error::not_found("volume"));
        assert!(is_store_error(&wrapped));
        assert!(find_store_error(&wrapped).is_some_and(Error::is_not_found));

        let plain = io::Error::other("unrelated");
        assert!(!is_store_error(&plain));
    }
}
