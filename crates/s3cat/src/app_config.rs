//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." said every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! Layers, weakest first: `S3CAT_*` env vars → optional TOML file → caller
//! overrides (the CLI flags). Nested keys in env vars use `__`, so
//! `S3CAT_STORE__BUCKET=my-bucket` lands in `[store] bucket`.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment, Provider,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::S3StoreConfig;
use crate::concat::AssemblyOptions;
use crate::error::ConcatError;
use crate::planner::{DEFAULT_SUB_CHUNK_THRESHOLD, SERVER_COPY_MIN};
use crate::units;
use crate::workers::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🪣 Which bucket, which region, which endpoint.
    pub store: S3StoreConfig,
    /// 🎯 What to concatenate and where to put it.
    pub job: JobConfig,
    /// 🧵 How hard to work while doing it.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🎯 The what: inputs, output, and the size of each output object.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct JobConfig {
    /// 📂 Prefixes whose every object is an input, in listing order.
    #[serde(default, alias = "folders")]
    pub prefixes: Vec<String>,
    /// 📄 Individual keys appended after the prefixes.
    #[serde(default)]
    pub keys: Vec<String>,
    /// 🎯 Destination key (group numbers get spliced in when numbering is on).
    pub output: String,
    /// 📏 Target size per output object, like `"5.2GB"`. Absent means one output.
    #[serde(default, alias = "filesize")]
    pub min_file_size: Option<String>,
}

impl JobConfig {
    /// 📏 Parsed `min_file_size`. Garbage here is a configuration error, not a surprise later.
    pub fn size_threshold(&self) -> Result<Option<u64>, ConcatError> {
        units::parse_optional_size(self.min_file_size.as_deref())
    }
}

/// 🧵 Runtime knobs. Every one has a default, so the whole section is optional.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Groups assembled at the same time.
    #[serde(default = "default_group_concurrency", alias = "group_threads")]
    pub group_concurrency: usize,
    /// Buffered sub-chunks uploaded at the same time inside one group.
    #[serde(default = "default_small_part_concurrency", alias = "small_parts_threads")]
    pub small_part_concurrency: usize,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// `None` numbers outputs only when a size threshold is set.
    #[serde(default)]
    pub number_output_parts: Option<bool>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Per-call deadline in seconds. Absent means trust the transport.
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    /// 📏 Sub-chunk size for buffered members, as a size string.
    #[serde(default)]
    pub sub_chunk_size: Option<String>,
}

fn default_group_concurrency() -> usize {
    4
}

fn default_small_part_concurrency() -> usize {
    1
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            group_concurrency: default_group_concurrency(),
            small_part_concurrency: default_small_part_concurrency(),
            content_type: default_content_type(),
            number_output_parts: None,
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            call_timeout_secs: None,
            sub_chunk_size: None,
        }
    }
}

impl RuntimeConfig {
    /// 🔄 Turn the knobs into engine options. `threshold` decides the numbering default.
    pub fn assembly_options(&self, threshold: Option<u64>) -> Result<AssemblyOptions, ConcatError> {
        let sub_chunk_threshold = match self.sub_chunk_size.as_deref() {
            Some(raw) => units::parse_size(raw)?,
            None => DEFAULT_SUB_CHUNK_THRESHOLD,
        };
        AssemblyOptions {
            group_concurrency: self.group_concurrency,
            small_part_concurrency: self.small_part_concurrency,
            content_type: self.content_type.clone(),
            number_output_parts: self.number_output_parts.unwrap_or(threshold.is_some()),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff: Duration::from_millis(self.retry_backoff_ms),
            },
            call_timeout: self.call_timeout_secs.map(Duration::from_secs),
            server_copy_min: SERVER_COPY_MIN,
            sub_chunk_threshold,
        }
        .validated()
    }
}

/// 🚀 Load the config: env vars, then the TOML file if there is one, then `overrides`.
///
/// 📐 DESIGN NOTE:
///   - `config_file_name` None → env vars (+ overrides) only. No file. No assumptions.
///   - `config_file_name` Some → env vars + TOML, TOML wins on conflicts.
///   - `overrides` always win. Pass `Figment::new()` when you have none.
pub fn load_config<P: Provider>(config_file_name: Option<&Path>, overrides: P) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("S3CAT_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let config = config.merge(overrides);

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}', environment variables (S3CAT_*) and flags. \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (S3CAT_*) and flags. \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use std::fs;

    fn write_test_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let the_path = dir.path().join("s3cat.toml");
        // 🧪 We write a real file here because Figment wants TOML from disk, like it's method acting.
        fs::write(&the_path, contents)
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        the_path
    }

    #[test]
    fn the_one_where_the_whole_toml_shows_up_dressed_for_work() {
        let the_dir = tempfile::tempdir().unwrap();
        let config_path = write_test_config(
            &the_dir,
            r#"
            [store]
            bucket = "my-bucket"
            region = "eu-west-1"
            endpoint_url = "http://localhost:9000"
            force_path_style = true

            [job]
            folders = ["some_folder/"]
            keys = ["extra/one.json"]
            output = "all_data.json"
            filesize = "10MB"

            [runtime]
            group_threads = 8
            small_parts_threads = 3
            content_type = "application/json"
            max_attempts = 5
            call_timeout_secs = 30
            "#,
        );

        let app_config = load_config(Some(config_path.as_path()), Figment::new())
            .expect("💀 A complete config should parse. The schema drift goblin does not get this win.");

        assert_eq!(app_config.store.bucket, "my-bucket");
        assert_eq!(app_config.store.region, "eu-west-1");
        assert!(app_config.store.force_path_style);
        assert_eq!(app_config.job.prefixes, vec!["some_folder/"]);
        assert_eq!(app_config.job.keys, vec!["extra/one.json"]);
        assert_eq!(app_config.job.size_threshold().unwrap(), Some(10 * units::MIB));
        assert_eq!(app_config.runtime.group_concurrency, 8);
        assert_eq!(app_config.runtime.small_part_concurrency, 3);

        let the_options = app_config
            .runtime
            .assembly_options(app_config.job.size_threshold().unwrap())
            .unwrap();
        assert!(the_options.number_output_parts);
        assert_eq!(the_options.retry.max_attempts, 5);
        assert_eq!(the_options.call_timeout, Some(Duration::from_secs(30)));
        assert_eq!(the_options.content_type, "application/json");
    }

    #[test]
    fn the_one_where_runtime_defaults_show_up_uninvited_but_helpful() {
        let the_dir = tempfile::tempdir().unwrap();
        let config_path = write_test_config(
            &the_dir,
            r#"
            [store]
            bucket = "b"

            [job]
            output = "out"
            "#,
        );

        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(config_path.as_path()))
            .extract()
            .expect("💀 Default runtime config should exist. Serde left us on read otherwise.");

        assert_eq!(app_config.runtime, RuntimeConfig::default());
        assert_eq!(app_config.job.size_threshold().unwrap(), None);

        let the_options = app_config.runtime.assembly_options(None).unwrap();
        assert_eq!(the_options.group_concurrency, 4);
        assert_eq!(the_options.small_part_concurrency, 1);
        assert_eq!(the_options.retry.max_attempts, 3);
        assert_eq!(the_options.sub_chunk_threshold, DEFAULT_SUB_CHUNK_THRESHOLD);
        // 🎯 no threshold, no numbering: the single output keeps its exact name
        assert!(!the_options.number_output_parts);
    }

    #[test]
    fn the_one_where_flags_outrank_the_file() {
        let the_dir = tempfile::tempdir().unwrap();
        let config_path = write_test_config(
            &the_dir,
            r#"
            [store]
            bucket = "from-file"

            [job]
            output = "from-file.json"
            "#,
        );

        let the_flags = Figment::new()
            .merge(Serialized::default("store.bucket", "from-flags"))
            .merge(Serialized::default("runtime.small_part_concurrency", 6));
        let app_config = load_config(Some(config_path.as_path()), the_flags).unwrap();

        assert_eq!(app_config.store.bucket, "from-flags");
        assert_eq!(app_config.job.output, "from-file.json");
        assert_eq!(app_config.runtime.small_part_concurrency, 6);
    }

    #[test]
    fn the_one_where_a_garbage_size_is_caught_before_any_bucket_is_bothered() {
        let the_job = JobConfig {
            prefixes: vec![],
            keys: vec![],
            output: "out".to_string(),
            min_file_size: Some("ten megs".to_string()),
        };
        assert!(matches!(
            the_job.size_threshold(),
            Err(ConcatError::Configuration(_))
        ));

        let the_runtime = RuntimeConfig {
            small_part_concurrency: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            the_runtime.assembly_options(None),
            Err(ConcatError::Configuration(_))
        ));
    }

    #[test]
    fn the_one_where_a_sub_chunk_below_the_part_minimum_never_leaves_the_config() {
        let the_runtime = RuntimeConfig {
            sub_chunk_size: Some("1MB".to_string()),
            ..RuntimeConfig::default()
        };
        match the_runtime.assembly_options(None) {
            Err(ConcatError::Configuration(the_message)) => {
                assert!(the_message.contains("sub-chunk threshold"));
            }
            other => panic!("expected a configuration error, got {other:?}"),
        }

        // ✅ exactly the part minimum is allowed
        let the_runtime = RuntimeConfig {
            sub_chunk_size: Some("5MB".to_string()),
            ..RuntimeConfig::default()
        };
        let the_options = the_runtime.assembly_options(None).unwrap();
        assert_eq!(the_options.sub_chunk_threshold, SERVER_COPY_MIN);
    }

    #[test]
    fn the_one_where_missing_required_fields_get_a_stern_message() {
        let the_dir = tempfile::tempdir().unwrap();
        let config_path = write_test_config(&the_dir, "[store]\nbucket = \"b\"\n");
        let the_err = load_config(Some(config_path.as_path()), Figment::new()).unwrap_err();
        assert!(the_err.to_string().contains("Failed to parse configuration"));
    }
}
