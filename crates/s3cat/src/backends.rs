//! 🔌 Backends: where the real I/O happens.
//!
//! 🪣 An [`ObjectStore`] is the capability set the assembly engine needs from a
//! bucket: list, head, copy, and the full multipart lifecycle. Nothing more.
//! It does not group, retry or reorder. It sends one request and reports back.
//!
//! 🎭 [`StoreBackend`] is the casting agency: S3 for real work, in-memory for
//! tests and dry runs. The engine never needs to know which one showed up.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;

use crate::common::{ListPage, PartDescriptor, UploadSession};

pub mod in_mem;
pub mod s3;

pub use in_mem::{InMemoryStore, StoreCall, StoreOp};
pub use s3::{S3Store, S3StoreConfig};

/// 🪣 What the engine needs from an object store.
///
/// # Contract
/// - every method is a single bounded request; the transport owns its own timeout
/// - `list` returns one page; `next` is `None` once the listing is exhausted
/// - `copy_part` / `upload_part` may be repeated for the same part number; the
///   last successful call for a number wins, which makes retries safe
/// - `complete_multipart` receives parts already sorted by part number
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// 📄 One page of keys under `prefix`, starting after `continuation`.
    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage>;

    /// 📏 Stored size of `key` in bytes.
    async fn head(&self, key: &str) -> Result<u64>;

    /// 📋 Server-side copy of a whole object.
    async fn copy(&self, dest_key: &str, source_key: &str) -> Result<()>;

    /// 🎫 Start a multipart upload targeting `dest_key`.
    async fn open_multipart(&self, dest_key: &str, content_type: &str) -> Result<UploadSession>;

    /// 📋 Server-side copy of `source_key` into part `part_number`. Returns the etag.
    async fn copy_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        source_key: &str,
    ) -> Result<String>;

    /// 📥 Full content of `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// 📤 Upload `body` as part `part_number`. Returns the etag.
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<String>;

    /// ✅ Stitch the parts together. The object appears atomically.
    async fn complete_multipart(&self, session: &UploadSession, parts: &[PartDescriptor]) -> Result<()>;

    /// 🗑️ Throw the session and every stored part away.
    async fn abort_multipart(&self, session: &UploadSession) -> Result<()>;
}

/// 🎭 The many faces of a store. A universal remote, except it only controls buckets.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    S3(S3Store),
}

#[async_trait]
impl ObjectStore for StoreBackend {
    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        match self {
            StoreBackend::InMemory(store) => store.list(prefix, continuation).await,
            StoreBackend::S3(store) => store.list(prefix, continuation).await,
        }
    }

    async fn head(&self, key: &str) -> Result<u64> {
        match self {
            StoreBackend::InMemory(store) => store.head(key).await,
            StoreBackend::S3(store) => store.head(key).await,
        }
    }

    async fn copy(&self, dest_key: &str, source_key: &str) -> Result<()> {
        match self {
            StoreBackend::InMemory(store) => store.copy(dest_key, source_key).await,
            StoreBackend::S3(store) => store.copy(dest_key, source_key).await,
        }
    }

    async fn open_multipart(&self, dest_key: &str, content_type: &str) -> Result<UploadSession> {
        match self {
            StoreBackend::InMemory(store) => store.open_multipart(dest_key, content_type).await,
            StoreBackend::S3(store) => store.open_multipart(dest_key, content_type).await,
        }
    }

    async fn copy_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        source_key: &str,
    ) -> Result<String> {
        match self {
            StoreBackend::InMemory(store) => store.copy_part(session, part_number, source_key).await,
            StoreBackend::S3(store) => store.copy_part(session, part_number, source_key).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match self {
            StoreBackend::InMemory(store) => store.get(key).await,
            StoreBackend::S3(store) => store.get(key).await,
        }
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<String> {
        match self {
            StoreBackend::InMemory(store) => store.upload_part(session, part_number, body).await,
            StoreBackend::S3(store) => store.upload_part(session, part_number, body).await,
        }
    }

    async fn complete_multipart(&self, session: &UploadSession, parts: &[PartDescriptor]) -> Result<()> {
        match self {
            StoreBackend::InMemory(store) => store.complete_multipart(session, parts).await,
            StoreBackend::S3(store) => store.complete_multipart(session, parts).await,
        }
    }

    async fn abort_multipart(&self, session: &UploadSession) -> Result<()> {
        match self {
            StoreBackend::InMemory(store) => store.abort_multipart(session).await,
            StoreBackend::S3(store) => store.abort_multipart(session).await,
        }
    }
}
