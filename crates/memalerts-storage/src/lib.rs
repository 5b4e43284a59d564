//! Content-addressed media storage access.
//!
//! This crate provides:
//! - The `ContentStore` seam consumed by the moderation pipeline
//! - Local-disk uploads store
//! - Cloudflare R2 (S3 API) object download
//! - Size-bounded HTTP download of public URLs
//! - Explicit content-hash recovery from structured storage paths

pub mod client;
pub mod error;
pub mod http;
pub mod local;
pub mod locator;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use http::download_url;
pub use local::LocalStore;
pub use locator::{file_extension, hash_from_storage_path, is_remote_url};
pub use store::{ContentStore, MediaStore};
