//! Label parsing for `--label` style arguments.

use std::collections::HashMap;

/// Parses `key=value` strings into a label map.
///
/// A bare `key` maps to an empty value. Only the first `=` separates key from
/// value. Later duplicates win.
pub fn parse_labels<S: AsRef<str>>(labels: &[S]) -> HashMap<String, String> {
    labels
        .iter()
        .map(|label| match label.as_ref().split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (label.as_ref().to_string(), String::new()),
        })
        .collect()
}
