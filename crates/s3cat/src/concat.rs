//! 🪣 The driver. Collects source records, splits them into groups and runs one
//! [`AssemblyJob`] per group with bounded concurrency.
//!
//! One group failing is that group's problem. Its siblings keep going, and the
//! caller gets one [`AssemblyOutcome`] per group to decide what a partial run means.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::assembly::{AssemblyJob, AssemblyOutcome};
use crate::backends::ObjectStore;
use crate::common::SourceRecord;
use crate::error::ConcatError;
use crate::grouping;
use crate::planner::{DEFAULT_SUB_CHUNK_THRESHOLD, SERVER_COPY_MIN};
use crate::progress::AssemblyProgress;
use crate::workers::{RetryPolicy, RetryingExecutor};

/// 🎛️ Everything the engine needs to know besides the records themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyOptions {
    /// Groups assembled at the same time.
    pub group_concurrency: usize,
    /// Buffered sub-chunks in flight inside one group.
    pub small_part_concurrency: usize,
    /// Content type of every multipart destination.
    pub content_type: String,
    /// Splice the group index into destination keys.
    pub number_output_parts: bool,
    pub retry: RetryPolicy,
    /// Deadline for each individual store call.
    pub call_timeout: Option<Duration>,
    /// Members strictly larger than this are copied server-side.
    pub server_copy_min: u64,
    /// Buffered members are packed into parts of roughly this size.
    pub sub_chunk_threshold: u64,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            group_concurrency: 4,
            small_part_concurrency: 1,
            content_type: "application/octet-stream".to_string(),
            number_output_parts: false,
            retry: RetryPolicy::default(),
            call_timeout: None,
            server_copy_min: SERVER_COPY_MIN,
            sub_chunk_threshold: DEFAULT_SUB_CHUNK_THRESHOLD,
        }
    }
}

impl AssemblyOptions {
    /// 🔍 Reject options that could only ever hang or spin, before any store call.
    pub fn validated(self) -> Result<Self, ConcatError> {
        if self.group_concurrency == 0 {
            return Err(ConcatError::Configuration(
                "group concurrency must be at least 1".to_string(),
            ));
        }
        if self.small_part_concurrency == 0 {
            return Err(ConcatError::Configuration(
                "small part concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConcatError::Configuration(
                "max attempts must be at least 1".to_string(),
            ));
        }
        // 📏 every buffered part but the last must clear the store's part minimum
        if self.sub_chunk_threshold == 0 || self.sub_chunk_threshold < self.server_copy_min {
            return Err(ConcatError::Configuration(format!(
                "sub-chunk threshold ({} bytes) must be at least the server-side copy minimum ({} bytes)",
                self.sub_chunk_threshold, self.server_copy_min
            )));
        }
        Ok(self)
    }
}

/// 🚀 Group `records` by `size_threshold` and assemble every group into its own
/// destination object.
///
/// Returns one outcome per group, ordered by group index. The outer error is
/// reserved for problems found before any store call: bad options, or several
/// groups with output numbering turned off.
pub async fn grouped_assemble<S: ObjectStore + 'static>(
    store: Arc<S>,
    records: &[SourceRecord],
    size_threshold: Option<u64>,
    destination_key: &str,
    options: &AssemblyOptions,
) -> Result<Vec<AssemblyOutcome>, ConcatError> {
    let options = options.clone().validated()?;
    let groups = grouping::group(records, size_threshold);
    if !options.number_output_parts && groups.len() > 1 {
        // 🎯 unnumbered groups would all land on the same key and overwrite each other
        return Err(ConcatError::Configuration(format!(
            "{} groups would all be written to '{}'; turn on output numbering or drop the size threshold",
            groups.len(),
            destination_key
        )));
    }
    let total_bytes = groups.iter().map(|g| g.total_bytes()).fold(0u64, u64::saturating_add);
    info!(
        "🧮 {} record(s) → {} group(s), {} bytes, threshold {:?}",
        records.len(),
        groups.len(),
        total_bytes,
        size_threshold
    );

    let progress = AssemblyProgress::new(destination_key, groups.len(), total_bytes);
    let executor = RetryingExecutor::new(options.group_concurrency)?;
    let job_progress = progress.clone();
    let base_key = destination_key.to_string();

    let mut outcomes = executor
        .run(groups, move |group| {
            let bytes = group.total_bytes();
            let job = AssemblyJob::new(Arc::clone(&store), group, &base_key, options.clone());
            let progress = job_progress.clone();
            async move {
                let outcome = job.run().await;
                progress.group_finished(bytes, outcome.is_success());
                // ✅ a failed group is still a finished item; siblings are not cancelled
                Ok::<_, ConcatError>(outcome)
            }
        })
        .await?;
    progress.finish();

    outcomes.sort_by_key(|o| o.group_index);
    let (done, failed) = progress.counts();
    if failed > 0 {
        warn!("⚠️ {} of {} group(s) failed", failed, done);
    } else {
        info!("🏁 all {} group(s) assembled", done);
    }
    Ok(outcomes)
}

/// 🧺 Collects inputs from listings and single keys, then concatenates them.
#[derive(Debug)]
pub struct Concatenator<S> {
    store: Arc<S>,
    output_key: String,
    size_threshold: Option<u64>,
    options: AssemblyOptions,
    records: Vec<SourceRecord>,
}

impl<S: ObjectStore + 'static> Concatenator<S> {
    pub fn new(
        store: Arc<S>,
        output_key: impl Into<String>,
        size_threshold: Option<u64>,
        options: AssemblyOptions,
    ) -> Self {
        Self {
            store,
            output_key: output_key.into(),
            size_threshold,
            options,
            records: Vec::new(),
        }
    }

    /// 📂 Append every object under `prefix`, page by page, in listing order.
    /// Returns how many records this prefix contributed.
    pub async fn add_files(&mut self, prefix: &str) -> anyhow::Result<usize> {
        let before = self.records.len();
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .store
                .list(prefix, continuation.take())
                .await
                .with_context(|| format!("💀 Failed to list objects under '{prefix}'"))?;
            self.records.extend(page.records);
            info!("🔎 Found {} objects so far", self.records.len());
            match page.next {
                Some(token) => {
                    debug!("📄 more objects under '{}', continuing", prefix);
                    continuation = Some(token);
                }
                None => break,
            }
        }
        Ok(self.records.len() - before)
    }

    /// 📄 Append one object by key, sized with a head request.
    pub async fn add_file(&mut self, key: &str) -> anyhow::Result<()> {
        let size = self
            .store
            .head(key)
            .await
            .with_context(|| format!("💀 Failed to read the size of '{key}'"))?;
        self.records.push(SourceRecord::new(key, size));
        Ok(())
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    /// 🚀 Assemble everything collected so far.
    pub async fn concat(&self) -> Result<Vec<AssemblyOutcome>, ConcatError> {
        grouped_assemble(
            Arc::clone(&self.store),
            &self.records,
            self.size_threshold,
            &self.output_key,
            &self.options,
        )
        .await
    }
}
