//! Content digests for verifying staged file copies.
use std::fs::File;
use std::io::{BufReader, Read as _};
use std::path::Path;

use sha2::{Digest as _, Sha256};

use crate::error::Error;

/// Read buffer size for streaming a file through the hasher.
const CHUNK: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a file's contents, streamed in fixed-size chunks.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<String, Error> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; CHUNK];
    loop {
        let read = reader.read(&mut buffer)?;
        let Some(chunk) = buffer.get(..read) else { break };
        if chunk.is_empty() {
            break;
        }
        hasher.update(chunk);
    }
    let digest = hasher.finalize();
    return Ok(format!("{digest:x}"));
}

/// Whether two files have identical contents by digest.
///
/// # Errors
///
/// Returns `Error::Io` if either file cannot be read.
pub fn same_contents(a: &Path, b: &Path) -> Result<bool, Error> {
    return Ok(hash_file(a)? == hash_file(b)?);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest_of_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn compares_contents_not_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let c = dir.path().join("c.png");
        let big = vec![7_u8; CHUNK * 2 + 5];
        std::fs::write(&a, &big).unwrap();
        std::fs::write(&b, &big).unwrap();
        std::fs::write(&c, b"other").unwrap();
        assert!(same_contents(&a, &b).unwrap());
        assert!(!same_contents(&a, &c).unwrap());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(hash_file(&dir.path().join("absent")), Err(Error::Io(_))));
    }
}
