//! Key transforms.
//!
//! A transform maps a key to the components actually used on disk. Stores
//! whose keys are not chosen by humans use one to keep directory fan-out
//! bounded.

use sha2::{Digest, Sha256};

/// Maps a key to the on-disk components that address it.
pub type KeyTransform = fn(&[&str]) -> Vec<String>;

/// Width of each directory level produced by [`sha256_blocks`].
pub const BLOCK_SIZE: usize = 8;

/// Shards a key by the sha256 of its `/`-joined components.
///
/// The hex digest is split into [`BLOCK_SIZE`] character blocks, one directory
/// level each.
pub fn sha256_blocks(key: &[&str]) -> Vec<String> {
    let digest = hex::encode(Sha256::digest(key.join("/").as_bytes()));
    digest
        .as_bytes()
        .chunks(BLOCK_SIZE)
        .map(|block| String::from_utf8_lossy(block).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_cover_whole_digest() {
        let blocks = sha256_blocks(&["foo", "bar"]);
        assert_eq!(blocks.len(), 64 / BLOCK_SIZE);
        assert!(blocks.iter().all(|b| b.len() == BLOCK_SIZE));
        assert_eq!(blocks.concat().len(), 64);
    }

    #[test]
    fn transform_is_deterministic_and_key_sensitive() {
        assert_eq!(sha256_blocks(&["foo", "bar"]), sha256_blocks(&["foo", "bar"]));
        assert_ne!(sha256_blocks(&["foo", "bar"]), sha256_blocks(&["foo", "baz"]));
    }
}
