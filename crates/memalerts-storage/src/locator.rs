//! Storage locator helpers.
//!
//! Locators are the strings stored in `file_url`/`source_url`: public upload
//! paths (`/uploads/memes/<hash>.mp4`), object-store URLs, or arbitrary
//! public URLs for imported media.

/// Length of a hex-encoded SHA-256 digest.
const HASH_HEX_LEN: usize = 64;

/// Whether the locator is an absolute HTTP(S) URL.
pub fn is_remote_url(locator: &str) -> bool {
    let lower = locator.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn strip_query(locator: &str) -> &str {
    locator.split(['?', '#']).next().unwrap_or_default()
}

/// Lowercase file extension of the locator's last path segment.
pub fn file_extension(locator: &str) -> Option<String> {
    let segment = strip_query(locator).rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    ext.chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then(|| ext.to_ascii_lowercase())
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Recover a content hash from a content-addressed storage path.
///
/// Uploads are stored under their SHA-256 digest, so a path segment whose
/// stem is exactly 64 hex characters is taken as the hash. Segments are
/// checked from the file name upwards; the first match wins.
pub fn hash_from_storage_path(locator: &str) -> Option<String> {
    strip_query(locator)
        .rsplit('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.split('.').next().unwrap_or_default())
        .find(|stem| is_hex_digest(stem))
        .map(|stem| stem.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_hash_from_upload_path() {
        let path = format!("/uploads/memes/{}.mp4", HASH);
        assert_eq!(hash_from_storage_path(&path).as_deref(), Some(HASH));
    }

    #[test]
    fn test_hash_from_url_with_query_and_uppercase() {
        let url = format!("https://cdn.test/memes/{}.webm?x=1", HASH.to_uppercase());
        assert_eq!(hash_from_storage_path(&url).as_deref(), Some(HASH));
    }

    #[test]
    fn test_hash_from_directory_segment() {
        let path = format!("/uploads/memes/{}/original.mp4", HASH);
        assert_eq!(hash_from_storage_path(&path).as_deref(), Some(HASH));
    }

    #[test]
    fn test_no_hash_in_plain_path() {
        assert_eq!(hash_from_storage_path("/uploads/memes/funny-cat.mp4"), None);
        // 63 hex chars is not a digest
        let short = format!("/uploads/{}.mp4", &HASH[1..]);
        assert_eq!(hash_from_storage_path(&short), None);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("/uploads/a.MP4").as_deref(), Some("mp4"));
        assert_eq!(file_extension("https://x.test/v.webm?t=1").as_deref(), Some("webm"));
        assert_eq!(file_extension("https://x.test/watch"), None);
        assert_eq!(file_extension("/uploads/.hidden"), None);
    }

    #[test]
    fn test_remote_url() {
        assert!(is_remote_url("https://example.com/a.mp4"));
        assert!(is_remote_url("HTTP://example.com"));
        assert!(!is_remote_url("/uploads/a.mp4"));
    }
}
