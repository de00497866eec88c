//! 🚀 s3cat-cli: the front door. Reads flags, loads config, sets up logging,
//! then lets the library do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use figment::Figment;
use figment::providers::Serialized;
use s3cat::{AssemblyOutcome, AssemblyStatus};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🪣 Concatenate S3 objects into one or more larger objects, in the same bucket.
#[derive(Debug, Parser)]
#[command(name = "s3cat", version, about)]
struct Cli {
    /// Optional TOML config. Flags win over the file, the file wins over S3CAT_* env vars.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bucket holding the sources and receiving the outputs.
    #[arg(long)]
    bucket: Option<String>,

    /// Prefix whose objects are all inputs. Repeatable.
    #[arg(long = "folder")]
    folders: Vec<String>,

    /// Single object key to append after the folders. Repeatable.
    #[arg(long = "key")]
    keys: Vec<String>,

    /// Destination key. Group numbers are spliced in when --filesize is set.
    #[arg(long)]
    output: Option<String>,

    /// Target size of each output object, like 5.2GB. Omit for a single output.
    #[arg(long)]
    filesize: Option<String>,

    /// Buffered parts uploaded at once inside one output.
    #[arg(long)]
    small_parts_threads: Option<usize>,

    /// Outputs assembled at once.
    #[arg(long)]
    group_threads: Option<usize>,

    #[arg(long)]
    content_type: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// S3-compatible endpoint (MinIO, LocalStack, ...). Turns on path-style addressing.
    #[arg(long)]
    endpoint_url: Option<String>,
}

impl Cli {
    /// 🎛️ Only the flags that were actually given, as a figment layer.
    fn overrides(&self) -> Figment {
        let mut layer = Figment::new();
        if let Some(bucket) = &self.bucket {
            layer = layer.merge(Serialized::default("store.bucket", bucket));
        }
        if let Some(region) = &self.region {
            layer = layer.merge(Serialized::default("store.region", region));
        }
        if let Some(endpoint_url) = &self.endpoint_url {
            layer = layer
                .merge(Serialized::default("store.endpoint_url", endpoint_url))
                .merge(Serialized::default("store.force_path_style", true));
        }
        if !self.folders.is_empty() {
            layer = layer.merge(Serialized::default("job.prefixes", &self.folders));
        }
        if !self.keys.is_empty() {
            layer = layer.merge(Serialized::default("job.keys", &self.keys));
        }
        if let Some(output) = &self.output {
            layer = layer.merge(Serialized::default("job.output", output));
        }
        if let Some(filesize) = &self.filesize {
            layer = layer.merge(Serialized::default("job.min_file_size", filesize));
        }
        if let Some(threads) = self.small_parts_threads {
            layer = layer.merge(Serialized::default("runtime.small_part_concurrency", threads));
        }
        if let Some(threads) = self.group_threads {
            layer = layer.merge(Serialized::default("runtime.group_concurrency", threads));
        }
        if let Some(content_type) = &self.content_type {
            layer = layer.merge(Serialized::default("runtime.content_type", content_type));
        }
        layer
    }
}

/// 🍽️ One row per group: where it went and how it ended.
fn summary(outcomes: &[AssemblyOutcome]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["group", "destination", "result"]);
    for outcome in outcomes {
        let result = match &outcome.result {
            Ok(AssemblyStatus::Empty) => "🫥 empty, nothing written".to_string(),
            Ok(AssemblyStatus::Copied) => "📋 copied".to_string(),
            Ok(AssemblyStatus::Assembled { parts }) => format!("✅ assembled from {parts} part(s)"),
            Err(err) => format!("💀 {err}"),
        };
        table.add_row(vec![
            Cell::new(outcome.group_index),
            Cell::new(&outcome.destination_key),
            Cell::new(result),
        ]);
    }
    table
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 RUST_LOG decides how chatty we are
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = async {
        let app_config = s3cat::app_config::load_config(cli.config.as_deref(), cli.overrides())
            .context("💀 Couldn't assemble a configuration from flags, file and environment")?;
        s3cat::run(app_config).await
    }
    .await;

    match result {
        Ok(outcomes) => {
            println!("{}", summary(&outcomes));
            let failed = outcomes.iter().filter(|o| !o.is_success()).count();
            if failed > 0 {
                error!("💀 {} of {} output(s) failed", failed, outcomes.len());
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion one layer at a time
            let mut looks_unreachable = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("dispatch failure")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("dns error")
                {
                    looks_unreachable = true;
                }
            }
            if looks_unreachable {
                error!(
                    "🔧 hint: the S3 endpoint isn't answering. Check --endpoint-url and --region, \
                     and that your credentials point at the account you think they do."
                );
            }
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3cat::app_config::AppConfig;

    #[test]
    fn the_one_where_flags_become_a_whole_config() {
        let the_cli = Cli::parse_from([
            "s3cat",
            "--bucket",
            "logs",
            "--folder",
            "2024/01/",
            "--folder",
            "2024/02/",
            "--output",
            "merged/all.json",
            "--filesize",
            "1GB",
            "--small-parts-threads",
            "5",
            "--endpoint-url",
            "http://localhost:9000",
        ]);

        let the_config: AppConfig = the_cli.overrides().extract().unwrap();
        assert_eq!(the_config.store.bucket, "logs");
        assert!(the_config.store.force_path_style);
        assert_eq!(the_config.job.prefixes, vec!["2024/01/", "2024/02/"]);
        assert_eq!(the_config.job.min_file_size.as_deref(), Some("1GB"));
        assert_eq!(the_config.runtime.small_part_concurrency, 5);
        assert_eq!(the_config.runtime.group_concurrency, 4);
    }

    #[test]
    fn the_one_where_a_bare_command_line_adds_no_layer_at_all() {
        let the_cli = Cli::try_parse_from(["s3cat"]).unwrap();
        assert!(the_cli.bucket.is_none());
        assert!(the_cli.folders.is_empty());

        // 🌍 S3CAT_* variables are figment's business; flags only ever add what was typed
        let the_layer = the_cli.overrides();
        assert!(the_layer.find_value("store.bucket").is_err());
        assert!(the_layer.find_value("runtime.group_concurrency").is_err());
    }

    #[test]
    fn the_one_where_the_table_tells_the_whole_story() {
        let the_outcomes = vec![
            AssemblyOutcome {
                group_index: 1,
                destination_key: "out-1.bin".to_string(),
                result: Ok(AssemblyStatus::Assembled { parts: 3 }),
            },
            AssemblyOutcome {
                group_index: 2,
                destination_key: "out-2.bin".to_string(),
                result: Err(s3cat::ConcatError::Integrity {
                    key: "out-2.bin".to_string(),
                    members: 2,
                }),
            },
        ];
        let mut the_table = summary(&the_outcomes);
        // 📏 wide enough that nothing wraps mid-word
        the_table.set_width(400);
        let the_rendered = the_table.to_string();
        assert!(the_rendered.contains("out-1.bin"));
        assert!(the_rendered.contains("3 part(s)"));
        assert!(the_rendered.contains("integrity failure"));
    }
}
