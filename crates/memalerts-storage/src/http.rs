//! Size-bounded HTTP download.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Download `url` into `path`, aborting once more than `max_bytes` arrive.
///
/// A declared `Content-Length` above the limit is rejected before any body
/// is read. A partially written file is removed on failure.
pub async fn download_url(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    max_bytes: u64,
) -> StorageResult<u64> {
    let parsed = url::Url::parse(url)
        .map_err(|e| StorageError::InvalidLocator(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(StorageError::InvalidLocator(url.to_string()));
    }

    debug!("Downloading {} to {}", url, path.display());

    let response = client.get(parsed).send().await?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(StorageError::not_found(url));
    }
    if !status.is_success() {
        return Err(StorageError::download_failed(format!(
            "HTTP {} for {}",
            status, url
        )));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(StorageError::TooLarge { limit: max_bytes });
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    let result: StorageResult<()> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(StorageError::TooLarge { limit: max_bytes });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(e);
    }

    info!("Downloaded {} ({} bytes)", url, written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_within_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 128]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("source.mp4");
        let client = reqwest::Client::new();

        let written = download_url(&client, &format!("{}/clip.mp4", server.uri()), &dest, 1024)
            .await
            .unwrap();

        assert_eq!(written, 128);
        assert_eq!(tokio::fs::read(&dest).await.unwrap().len(), 128);
    }

    #[tokio::test]
    async fn test_download_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("source.mp4");
        let client = reqwest::Client::new();

        let err = download_url(&client, &format!("{}/big.mp4", server.uri()), &dest, 1024)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::TooLarge { limit: 1024 }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let err = download_url(
            &client,
            &format!("{}/gone.mp4", server.uri()),
            &dir.path().join("x"),
            1024,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_download_rejects_non_http_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let err = download_url(&client, "file:///etc/passwd", &dir.path().join("x"), 1024)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
