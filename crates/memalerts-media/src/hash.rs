//! Streaming SHA-256 content hashing.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::{MediaError, MediaResult};

/// Read buffer size for hashing.
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Compute the lowercase hex SHA-256 digest of a file.
pub async fn sha256_file(path: impl AsRef<Path>) -> MediaResult<String> {
    let path = path.as_ref();
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MediaError::FileNotFound(path.to_path_buf())
        } else {
            MediaError::Io(e)
        }
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Whether `s` looks like a content hash (64 hex characters).
pub fn is_content_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let hash = sha256_file(&path).await.unwrap();
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(is_content_hash(&hash));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = sha256_file("/nonexistent/definitely/missing.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_is_content_hash() {
        assert!(!is_content_hash("abc"));
        assert!(!is_content_hash(&"z".repeat(64)));
        assert!(is_content_hash(&"a1".repeat(32)));
    }
}
