//! Identifier and path component validation.
//!
//! Two rules live here:
//!
//! - [`validate_docker_compat`] is the user-facing naming rule shared with
//!   Docker: an alphanumeric first character followed by at least one
//!   alphanumeric, `_`, `.` or `-`.
//! - [`validate_path_component`] is the filesystem safety rule applied to every
//!   component of a store key before it is joined onto a directory.
//!
//! Anything that passes `validate_docker_compat` also passes
//! `validate_path_component`, so validated identifiers can be used directly as
//! directory names.
//!
//! ```rust
//! use ctrstate_identifiers::{generate_id, validate_docker_compat};
//!
//! assert!(validate_docker_compat("my-volume").is_ok());
//! assert!(validate_docker_compat("bad/name").is_err());
//! assert!(validate_docker_compat(&generate_id()).is_ok());
//! ```

use lazy_static::lazy_static;
use rand::RngCore;
use regex::Regex;

/// Longest identifier or path component, in bytes.
///
/// Most filesystems cap a single name at 255 bytes.
pub const MAX_COMPONENT_BYTES: usize = 255;

/// Character classes for docker-compatible identifiers.
pub const ALLOWED_IDENTIFIER_CHARS: &str = "[a-zA-Z0-9][a-zA-Z0-9_.-]";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument {value:?}: {message}")]
    InvalidArgument { value: String, message: String },
}

impl Error {
    fn invalid(value: &str, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            value: value.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a user-facing identifier (volume name, container name, ...).
pub fn validate_docker_compat(s: &str) -> Result<(), Error> {
    lazy_static! {
        static ref ALLOWED_IDENTIFIER_PATTERN: Regex =
            Regex::new(&format!("^{}+$", ALLOWED_IDENTIFIER_CHARS)).unwrap();
    }

    if s.is_empty() {
        return Err(Error::invalid(s, "identifier must not be empty"));
    }

    if s.len() > MAX_COMPONENT_BYTES {
        return Err(Error::invalid(
            s,
            format!(
                "identifier must not be longer than {} bytes",
                MAX_COMPONENT_BYTES
            ),
        ));
    }

    if !ALLOWED_IDENTIFIER_PATTERN.is_match(s) {
        return Err(Error::invalid(
            s,
            format!(
                "identifier must match pattern {:?}",
                format!("{}+", ALLOWED_IDENTIFIER_CHARS)
            ),
        ));
    }

    Ok(())
}

/// Validate a single component of a filesystem key.
///
/// Rejects anything that could escape the directory it is joined onto or that
/// the filesystem would refuse as a name.
pub fn validate_path_component(component: &str) -> Result<(), Error> {
    if component.trim().is_empty() {
        return Err(Error::invalid(component, "path component must not be empty"));
    }

    if component.len() > MAX_COMPONENT_BYTES {
        return Err(Error::invalid(
            component,
            format!(
                "path component must not be longer than {} bytes",
                MAX_COMPONENT_BYTES
            ),
        ));
    }

    if component == "." || component == ".." {
        return Err(Error::invalid(
            component,
            "path component must not be a relative directory reference",
        ));
    }

    if let Some(c) = component.chars().find(|c| *c == '/' || *c == '\0') {
        return Err(Error::invalid(
            component,
            format!("invalid character {:?} in path component", c),
        ));
    }

    Ok(())
}

/// Generate a random 64 character hex identifier.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_compat_accepts_common_names() {
        for name in ["ab", "my-volume", "my_volume", "v1.2", "0abc", "A-._z"] {
            assert_eq!(validate_docker_compat(name), Ok(()), "{}", name);
        }
    }

    #[test]
    fn docker_compat_rejects_bad_names() {
        for name in ["", "a", "_", "-ab", ".ab", "bad/name", "∞", "sp ace", "../x"] {
            assert!(
                matches!(
                    validate_docker_compat(name),
                    Err(Error::InvalidArgument { .. })
                ),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn docker_compat_enforces_length() {
        let longest = "a".repeat(MAX_COMPONENT_BYTES);
        assert!(validate_docker_compat(&longest).is_ok());

        let too_long = "a".repeat(MAX_COMPONENT_BYTES + 1);
        assert!(validate_docker_compat(&too_long).is_err());
    }

    #[test]
    fn path_component_rejects_traversal() {
        for component in ["", " ", "\t", ".", "..", "a/b", "/", "nul\0byte"] {
            assert!(
                validate_path_component(component).is_err(),
                "{:?} should be rejected",
                component
            );
        }
    }

    #[test]
    fn path_component_accepts_odd_but_safe_names() {
        for component in ["_data", "volume.json", "...", ".hidden", "∞", "with space"] {
            assert_eq!(validate_path_component(component), Ok(()), "{}", component);
        }
    }

    #[test]
    fn error_display_names_value() {
        let e = validate_docker_compat("bad/name").unwrap_err();
        let display = format!("{}", e);
        assert!(display.contains("invalid argument"));
        assert!(display.contains("bad/name"));
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(validate_docker_compat(&a).is_ok());
        assert!(validate_path_component(&a).is_ok());
    }
}
