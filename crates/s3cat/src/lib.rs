//! 🪣 s3cat: many small S3 objects in, a few big ones out, without dragging
//! the big ones through this machine.
//!
//! Records are grouped by size, each group becomes one multipart upload, large
//! members are copied server-side and small ones are glued together locally.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub mod app_config;
pub mod assembly;
pub mod backends;
pub mod common;
pub mod concat;
pub mod error;
pub mod grouping;
pub mod planner;
pub mod progress;
pub mod units;
pub mod workers;

pub use assembly::{AssemblyJob, AssemblyOutcome, AssemblyStatus, destination_key};
pub use backends::{InMemoryStore, ObjectStore, S3Store, S3StoreConfig, StoreBackend};
pub use common::{Group, PartDescriptor, SourceRecord, UploadSession};
pub use concat::{AssemblyOptions, Concatenator, grouped_assemble};
pub use error::ConcatError;
pub use workers::{RetryPolicy, RetryingExecutor};

use crate::app_config::AppConfig;

/// 🚀 Collect the configured inputs from S3 and concatenate them.
pub async fn run(app_config: AppConfig) -> Result<Vec<AssemblyOutcome>> {
    let threshold = app_config.job.size_threshold()?;
    let options = app_config.runtime.assembly_options(threshold)?;
    let store = S3Store::new(&app_config.store)
        .await
        .context("💀 Failed to build the S3 client")?;
    info!(
        "🪣 bucket '{}': {} prefix(es), {} key(s) → '{}'",
        store.bucket(),
        app_config.job.prefixes.len(),
        app_config.job.keys.len(),
        app_config.job.output
    );

    let mut concatenator = Concatenator::new(
        Arc::new(StoreBackend::S3(store)),
        app_config.job.output.clone(),
        threshold,
        options,
    );
    for prefix in &app_config.job.prefixes {
        concatenator.add_files(prefix).await?;
    }
    for key in &app_config.job.keys {
        concatenator.add_file(key).await?;
    }

    Ok(concatenator.concat().await?)
}
