//! # Previously, on s3cat...
//!
//! 🎬 The bucket was expensive. The integration account needed three approvals
//! and a blood sample. So somebody wrote a bucket that lives entirely in RAM,
//! gone the moment you blink.
//!
//! [`InMemoryStore`] implements the whole [`ObjectStore`] contract over a
//! `BTreeMap`, keeps a ledger of every call it received, and can be told to
//! fail on purpose or to dawdle. Faults fire either before a call touches
//! anything or right after it wrote a garbled part.
//!
//! It enforces the bits of multipart S3 that matter to us: parts must be
//! listed in ascending order, etags must match, and (when configured) every
//! part except the last must clear a minimum size.
//!
//! ⚠️ This is NOT for production. If you're deploying this to prod, please also
//! deploy a therapist. 🦆

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backends::ObjectStore;
use crate::common::{ListPage, PartDescriptor, SourceRecord, UploadSession};

/// 🏷️ Which store operation a call or a fault refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Head,
    Copy,
    OpenMultipart,
    CopyPart,
    Get,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
}

/// 📒 One entry in the call ledger. Failed calls are recorded too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List { prefix: String },
    Head { key: String },
    Copy { dest_key: String, source_key: String },
    OpenMultipart { dest_key: String, content_type: String },
    CopyPart { dest_key: String, part_number: u32, source_key: String },
    Get { key: String },
    UploadPart { dest_key: String, part_number: u32, len: usize },
    CompleteMultipart { dest_key: String, part_numbers: Vec<u32> },
    AbortMultipart { dest_key: String },
}

impl StoreCall {
    pub fn op(&self) -> StoreOp {
        match self {
            StoreCall::List { .. } => StoreOp::List,
            StoreCall::Head { .. } => StoreOp::Head,
            StoreCall::Copy { .. } => StoreOp::Copy,
            StoreCall::OpenMultipart { .. } => StoreOp::OpenMultipart,
            StoreCall::CopyPart { .. } => StoreOp::CopyPart,
            StoreCall::Get { .. } => StoreOp::Get,
            StoreCall::UploadPart { .. } => StoreOp::UploadPart,
            StoreCall::CompleteMultipart { .. } => StoreOp::CompleteMultipart,
            StoreCall::AbortMultipart { .. } => StoreOp::AbortMultipart,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    /// `None` fails forever. Some(n) fails the next n calls.
    remaining: Option<usize>,
    /// Fail only after the call has already changed the bucket.
    after_write: bool,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    calls: Vec<StoreCall>,
    faults: Vec<Fault>,
    delays: HashMap<StoreOp, Duration>,
    next_upload_id: u64,
}

impl State {
    /// 📒 Record the call, then decide whether it's this call's turn to fail.
    fn record(&mut self, call: StoreCall) -> Result<()> {
        let op = call.op();
        self.calls.push(call);
        if self.arm(op, false) {
            bail!("💀 injected failure for {op:?}");
        }
        Ok(())
    }

    /// 🎯 Spend one shot of the first live fault for `op`, if there is one.
    fn arm(&mut self, op: StoreOp, after_write: bool) -> bool {
        let armed = self
            .faults
            .iter_mut()
            .find(|f| f.op == op && f.after_write == after_write && f.remaining != Some(0));
        match armed {
            Some(fault) => {
                if let Some(n) = fault.remaining.as_mut() {
                    *n -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// 🩹 Store a part. When a write-then-fail fault is live, the stored bytes are
    /// mangled and the call errors anyway, so only a retry can put things right.
    fn store_part(
        &mut self,
        session: &UploadSession,
        part_number: u32,
        body: Vec<u8>,
        op: StoreOp,
    ) -> Result<String> {
        let torn = self.arm(op, true);
        let body = if torn {
            body.into_iter().map(|b| !b).collect()
        } else {
            body
        };
        let etag = etag_of(&body);
        self.upload(session)?
            .parts
            .insert(part_number, (etag.clone(), body));
        if torn {
            bail!("💀 injected failure for {op:?} after part {part_number} was stored");
        }
        Ok(etag)
    }

    fn upload(&mut self, session: &UploadSession) -> Result<&mut PendingUpload> {
        let upload = self
            .uploads
            .get_mut(&session.upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload: '{}'", session.upload_id))?;
        ensure!(
            upload.key == session.key,
            "upload '{}' belongs to '{}', not '{}'",
            session.upload_id,
            upload.key,
            session.key
        );
        Ok(upload)
    }
}

fn etag_of(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// 🧠 A bucket made of heap. Clone-able: every clone shares the same state,
/// so tests can hand one to the engine and keep one for peeking.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    page_size: usize,
    min_part_size: u64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            page_size: 1000,
            min_part_size: 0,
        }
    }

    /// 📄 Keys per `list` page. Small values exercise pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// 📏 Reject non-final parts smaller than this on completion, like S3 does.
    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    pub async fn put(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.state.lock().await.objects.insert(
            key.into(),
            StoredObject {
                body: body.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().await.objects.get(key).map(|o| o.body.clone())
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .objects
            .get(key)
            .map(|o| o.content_type.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.state.lock().await.objects.keys().cloned().collect()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn count(&self, op: StoreOp) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    pub async fn open_uploads(&self) -> usize {
        self.state.lock().await.uploads.len()
    }

    /// 💣 Fail the next `times` calls of `op`.
    pub async fn fail_next(&self, op: StoreOp, times: usize) {
        self.state.lock().await.faults.push(Fault {
            op,
            remaining: Some(times),
            after_write: false,
        });
    }

    /// 💣 Let the next `times` calls of `op` write a garbled part, then report failure.
    /// Only `CopyPart` and `UploadPart` write parts; other ops ignore this.
    pub async fn fail_after_write(&self, op: StoreOp, times: usize) {
        self.state.lock().await.faults.push(Fault {
            op,
            remaining: Some(times),
            after_write: true,
        });
    }

    /// 💣 Fail every call of `op`, forever. Or until the test ends, which is forever enough.
    pub async fn fail_always(&self, op: StoreOp) {
        self.state.lock().await.faults.push(Fault {
            op,
            remaining: None,
            after_write: false,
        });
    }

    /// 🐌 Every call of `op` sleeps this long before doing anything, with the
    /// bucket unlocked. Pairs well with a call deadline.
    pub async fn delay(&self, op: StoreOp, latency: Duration) {
        self.state.lock().await.delays.insert(op, latency);
    }

    /// 📒 Log the call, fire any up-front fault, then sit out the op's latency.
    async fn enter(&self, call: StoreCall) -> Result<()> {
        let latency = {
            let mut state = self.state.lock().await;
            let latency = state.delays.get(&call.op()).copied();
            state.record(call)?;
            latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        self.enter(StoreCall::List {
            prefix: prefix.to_string(),
        })
        .await?;
        let state = self.state.lock().await;

        let mut records: Vec<SourceRecord> = state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.as_deref().is_none_or(|marker| key.as_str() > marker))
            .take(self.page_size + 1)
            .map(|(key, object)| SourceRecord::new(key.clone(), object.body.len() as u64))
            .collect();

        // 🔭 peeked one past the page: if it exists, there's another page
        let next = if records.len() > self.page_size {
            records.truncate(self.page_size);
            records.last().map(|r| r.key.clone())
        } else {
            None
        };
        Ok(ListPage { records, next })
    }

    async fn head(&self, key: &str) -> Result<u64> {
        self.enter(StoreCall::Head { key: key.to_string() }).await?;
        let state = self.state.lock().await;
        state
            .objects
            .get(key)
            .map(|o| o.body.len() as u64)
            .ok_or_else(|| anyhow!("NoSuchKey: '{key}'"))
    }

    async fn copy(&self, dest_key: &str, source_key: &str) -> Result<()> {
        self.enter(StoreCall::Copy {
            dest_key: dest_key.to_string(),
            source_key: source_key.to_string(),
        })
        .await?;
        let mut state = self.state.lock().await;
        let object = state
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: '{source_key}'"))?;
        state.objects.insert(dest_key.to_string(), object);
        Ok(())
    }

    async fn open_multipart(&self, dest_key: &str, content_type: &str) -> Result<UploadSession> {
        self.enter(StoreCall::OpenMultipart {
            dest_key: dest_key.to_string(),
            content_type: content_type.to_string(),
        })
        .await?;
        let mut state = self.state.lock().await;
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: dest_key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(UploadSession {
            key: dest_key.to_string(),
            upload_id,
        })
    }

    async fn copy_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        source_key: &str,
    ) -> Result<String> {
        self.enter(StoreCall::CopyPart {
            dest_key: session.key.clone(),
            part_number,
            source_key: source_key.to_string(),
        })
        .await?;
        let mut state = self.state.lock().await;
        let body = state
            .objects
            .get(source_key)
            .map(|o| o.body.clone())
            .ok_or_else(|| anyhow!("NoSuchKey: '{source_key}'"))?;
        state.store_part(session, part_number, body, StoreOp::CopyPart)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.enter(StoreCall::Get { key: key.to_string() }).await?;
        let state = self.state.lock().await;
        state
            .objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| anyhow!("NoSuchKey: '{key}'"))
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<String> {
        self.enter(StoreCall::UploadPart {
            dest_key: session.key.clone(),
            part_number,
            len: body.len(),
        })
        .await?;
        let mut state = self.state.lock().await;
        state.store_part(session, part_number, body, StoreOp::UploadPart)
    }

    async fn complete_multipart(&self, session: &UploadSession, parts: &[PartDescriptor]) -> Result<()> {
        self.enter(StoreCall::CompleteMultipart {
            dest_key: session.key.clone(),
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        })
        .await?;
        let mut state = self.state.lock().await;

        ensure!(!parts.is_empty(), "MalformedXML: at least one part is required");
        ensure!(
            parts.windows(2).all(|w| w[0].part_number < w[1].part_number),
            "InvalidPartOrder: parts must be listed in ascending order"
        );

        let min_part_size = self.min_part_size;
        let upload = state.upload(session)?;
        let mut body = Vec::new();
        for (position, part) in parts.iter().enumerate() {
            let (etag, bytes) = upload
                .parts
                .get(&part.part_number)
                .with_context(|| format!("InvalidPart: part {} was never uploaded", part.part_number))?;
            ensure!(
                *etag == part.etag,
                "InvalidPart: etag mismatch for part {}",
                part.part_number
            );
            let is_last = position + 1 == parts.len();
            ensure!(
                is_last || bytes.len() as u64 >= min_part_size,
                "EntityTooSmall: part {} is {} bytes",
                part.part_number,
                bytes.len()
            );
            body.extend_from_slice(bytes);
        }

        let content_type = upload.content_type.clone();
        let key = upload.key.clone();
        state.uploads.remove(&session.upload_id);
        state.objects.insert(key, StoredObject { body, content_type });
        Ok(())
    }

    async fn abort_multipart(&self, session: &UploadSession) -> Result<()> {
        self.enter(StoreCall::AbortMultipart {
            dest_key: session.key.clone(),
        })
        .await?;
        let mut state = self.state.lock().await;
        state
            .uploads
            .remove(&session.upload_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("NoSuchUpload: '{}'", session.upload_id))
    }
}
