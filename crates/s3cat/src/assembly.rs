//! 🧩 Assembly: turning one group of source objects into one destination object.
//!
//! ```text
//!   0 members ──▶ Empty (nothing to write)
//!   1 member  ──▶ server-side copy ──▶ Copied
//!   2+        ──▶ open ──▶ copy parts (1..K, one by one)
//!                      ──▶ buffered sub-chunks (K+1.., worker pool)
//!                      ──▶ sort ──▶ complete ──▶ Assembled
//!                  any failure after open ──▶ abort
//! ```
//!
//! Part numbers are handed out before any upload starts, so the sub-chunk
//! workers can finish in any order and the commit still comes out in order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::backends::ObjectStore;
use crate::common::{Group, PartDescriptor, SourceRecord, UploadSession};
use crate::concat::AssemblyOptions;
use crate::error::ConcatError;
use crate::planner;
use crate::workers::RetryingExecutor;

/// 🎯 Where group `index` lands.
///
/// With `add_index`, the index is spliced in before the extension of the last
/// path segment (`out/all.json` → `out/all-3.json`), or appended when that
/// segment has no extension (`out/all` → `out/all-3`).
pub fn destination_key(base_key: &str, index: u32, add_index: bool) -> String {
    if !add_index {
        return base_key.to_string();
    }
    let segment_start = base_key.rfind('/').map_or(0, |slash| slash + 1);
    match base_key[segment_start..].rfind('.') {
        Some(dot) => {
            let dot = segment_start + dot;
            format!("{}-{}{}", &base_key[..dot], index, &base_key[dot..])
        }
        None => format!("{base_key}-{index}"),
    }
}

/// ✅ What a finished group produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyStatus {
    /// 🫥 The group had no members, so nothing was written.
    Empty,
    /// 📋 A single member, copied server-side.
    Copied,
    /// 🧩 A multipart upload committed with this many parts.
    Assembled { parts: usize },
}

/// 📬 One group's result. Failures stay per-group and never touch siblings.
#[derive(Debug)]
pub struct AssemblyOutcome {
    pub group_index: u32,
    pub destination_key: String,
    pub result: Result<AssemblyStatus, ConcatError>,
}

impl AssemblyOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// 🎯 The key that now exists because of this group, if any.
    pub fn written_key(&self) -> Option<&str> {
        match self.result {
            Ok(AssemblyStatus::Copied | AssemblyStatus::Assembled { .. }) => Some(&self.destination_key),
            _ => None,
        }
    }
}

/// 📦 A run of buffered members that becomes exactly one uploaded part.
#[derive(Debug, Clone)]
struct SubChunk {
    part_number: u32,
    members: Vec<SourceRecord>,
}

/// ⏱️ Bound a store call by the configured deadline. An elapsed deadline is a
/// plain error, so callers classify it like any other failure of that call.
async fn with_deadline<T, F>(deadline: Option<Duration>, call: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match deadline {
        None => call.await,
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| anyhow!("⏱️ call did not finish within {limit:?}"))?,
    }
}

/// 📥 Fetch every member in order, glue the bytes together and upload them as
/// the chunk's pre-assigned part.
async fn upload_sub_chunk<S: ObjectStore + ?Sized>(
    store: &S,
    session: &UploadSession,
    chunk: SubChunk,
    deadline: Option<Duration>,
) -> Result<PartDescriptor, ConcatError> {
    let expected: u64 = chunk.members.iter().map(|m| m.size).sum();
    let mut body = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
    for member in &chunk.members {
        let bytes = with_deadline(deadline, store.get(&member.key))
            .await
            .map_err(|e| ConcatError::transient("get", &member.key, e))?;
        body.extend_from_slice(&bytes);
    }
    debug!(
        "📤 part {} of '{}': {} member(s), {} bytes",
        chunk.part_number,
        session.key,
        chunk.members.len(),
        body.len()
    );
    let etag = with_deadline(deadline, store.upload_part(session, chunk.part_number, body))
        .await
        .map_err(|e| ConcatError::transient("upload_part", &session.key, e))?;
    Ok(PartDescriptor {
        part_number: chunk.part_number,
        etag,
    })
}

/// 🧩 Assembles one group into one destination object.
#[derive(Debug)]
pub struct AssemblyJob<S> {
    store: Arc<S>,
    group: Group,
    destination_key: String,
    options: AssemblyOptions,
}

impl<S: ObjectStore + 'static> AssemblyJob<S> {
    pub fn new(store: Arc<S>, group: Group, base_key: &str, options: AssemblyOptions) -> Self {
        let destination_key = destination_key(base_key, group.index, options.number_output_parts);
        Self {
            store,
            group,
            destination_key,
            options,
        }
    }

    pub fn destination_key(&self) -> &str {
        &self.destination_key
    }

    /// 🚀 Run the group to completion. Never panics, never leaves an open upload
    /// behind on purpose: the result says what happened.
    pub async fn run(self) -> AssemblyOutcome {
        let result = match self.group.members.len() {
            0 => Ok(AssemblyStatus::Empty),
            1 => self.copy_single(&self.group.members[0]).await,
            _ => self.assemble_multipart().await,
        };
        match &result {
            Ok(status) => info!(
                "✅ group {} → '{}': {:?}",
                self.group.index, self.destination_key, status
            ),
            Err(err) => error!(
                "💀 group {} → '{}' failed: {}",
                self.group.index, self.destination_key, err
            ),
        }
        AssemblyOutcome {
            group_index: self.group.index,
            destination_key: self.destination_key,
            result,
        }
    }

    async fn copy_single(&self, source: &SourceRecord) -> Result<AssemblyStatus, ConcatError> {
        info!("📋 copying '{}' → '{}'", source.key, self.destination_key);
        with_deadline(
            self.options.call_timeout,
            self.store.copy(&self.destination_key, &source.key),
        )
        .await
        .map_err(|e| ConcatError::permanent("copy", &self.destination_key, e))?;
        Ok(AssemblyStatus::Copied)
    }

    async fn assemble_multipart(&self) -> Result<AssemblyStatus, ConcatError> {
        let session = with_deadline(
            self.options.call_timeout,
            self.store
                .open_multipart(&self.destination_key, &self.options.content_type),
        )
        .await
        .map_err(|e| ConcatError::permanent("open_multipart", &self.destination_key, e))?;
        debug!(
            "🎫 opened upload '{}' for '{}' ({} members)",
            session.upload_id,
            session.key,
            self.group.members.len()
        );

        let mut parts = match self.upload_parts(&session).await {
            Ok(parts) if parts.is_empty() => {
                return Err(self
                    .abort(
                        &session,
                        ConcatError::Integrity {
                            key: self.destination_key.clone(),
                            members: self.group.members.len(),
                        },
                    )
                    .await);
            }
            Ok(parts) => parts,
            Err(err) => return Err(self.abort(&session, err).await),
        };

        // 📐 workers finish in any order; the commit wants ascending part numbers
        parts.sort_by_key(|p| p.part_number);
        let part_count = parts.len();

        if let Err(e) = with_deadline(
            self.options.call_timeout,
            self.store.complete_multipart(&session, &parts),
        )
        .await
        {
            let err = ConcatError::permanent("complete_multipart", &self.destination_key, e);
            return Err(self.abort(&session, err).await);
        }
        Ok(AssemblyStatus::Assembled { parts: part_count })
    }

    /// 🏗️ Copy parts first, numbered 1..=K, then buffered sub-chunks from K+1.
    async fn upload_parts(&self, session: &UploadSession) -> Result<Vec<PartDescriptor>, ConcatError> {
        let plan = planner::plan(&self.group, self.options.server_copy_min);
        let chunks = planner::subchunk(&plan.buffer_eligible, self.options.sub_chunk_threshold);
        let mut parts = Vec::with_capacity(plan.copy_eligible.len() + chunks.len());

        let deadline = self.options.call_timeout;
        for (offset, record) in plan.copy_eligible.iter().enumerate() {
            let part_number = offset as u32 + 1;
            let etag = self
                .options
                .retry
                .run(&record.key, || async move {
                    with_deadline(deadline, self.store.copy_part(session, part_number, &record.key))
                        .await
                        .map_err(|e| ConcatError::transient("copy_part", &record.key, e))
                })
                .await?;
            parts.push(PartDescriptor { part_number, etag });
        }

        if chunks.is_empty() {
            return Ok(parts);
        }

        let first_buffered = parts.len() as u32 + 1;
        let chunks: Vec<SubChunk> = chunks
            .into_iter()
            .enumerate()
            .map(|(offset, members)| SubChunk {
                part_number: first_buffered + offset as u32,
                members,
            })
            .collect();

        let executor = RetryingExecutor::new(self.options.small_part_concurrency)?
            .with_policy(self.options.retry);
        let store = Arc::clone(&self.store);
        let upload_session = session.clone();
        let uploaded = executor
            .run(chunks, move |chunk| {
                let store = Arc::clone(&store);
                let session = upload_session.clone();
                async move { upload_sub_chunk(&*store, &session, chunk, deadline).await }
            })
            .await?;
        parts.extend(uploaded);
        Ok(parts)
    }

    /// 🗑️ Abort the upload and hand back the failure that caused it. An abort that
    /// itself fails is logged, since the original cause is the one worth reporting.
    async fn abort(&self, session: &UploadSession, cause: ConcatError) -> ConcatError {
        warn!(
            "🗑️ aborting upload '{}' for '{}': {}",
            session.upload_id, session.key, cause
        );
        if let Err(e) =
            with_deadline(self.options.call_timeout, self.store.abort_multipart(session)).await
        {
            error!(
                "💀 abort of upload '{}' for '{}' failed, stored parts may linger: {:#}",
                session.upload_id, session.key, e
            );
        }
        cause
    }
}
