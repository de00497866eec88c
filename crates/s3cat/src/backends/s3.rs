//! 🪣🚀 S3 Backend: the real bucket, the real bill.
//!
//! INT. AWS CONSOLE, NIGHT. A prefix holds 400k objects of 3 KB each. Somebody
//! wants one file. The S3Store opens a multipart upload and starts whispering
//! `UploadPartCopy` at the bucket, which does the heavy lifting on its own
//! side of the wire. We only download what S3 refuses to copy for us.
//!
//! 🧠 Knowledge graph:
//! - Transport: AWS SDK client, one call per trait method, no retries of our own
//! - Credentials: the usual aws-config chain (env vars → ~/.aws → IAM role → hope)
//! - `endpoint_url` + `force_path_style` make MinIO, LocalStack and wiremock happy
//! - Etags come back quoted; we strip the quotes, S3 accepts them bare on completion

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::ObjectStore;
use crate::common::{ListPage, PartDescriptor, SourceRecord, UploadSession};

/// 🔣 Escape everything in a copy source except the unreserved set and `/`.
const COPY_SOURCE_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// 🔧 Where the bucket lives and how to talk to it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct S3StoreConfig {
    /// 🪣 The bucket: sources are read from it and outputs written to it.
    pub bucket: String,
    /// 🌎 AWS region, defaults to "us-east-1" because that's where data goes to retire
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// 🔗 Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// 🛣️ `https://host/bucket/key` instead of `https://bucket.host/key`.
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

/// 🪣 An [`ObjectStore`] backed by one S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

fn strip_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn part_number_i32(part_number: u32) -> Result<i32> {
    i32::try_from(part_number).with_context(|| format!("part number {part_number} does not fit S3's i32"))
}

impl S3Store {
    /// 🚀 Build a client from the environment's credential chain plus `config`.
    pub async fn new(config: &S3StoreConfig) -> Result<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style);
        if let Some(endpoint_url) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        debug!(
            "🪣 S3 store ready: bucket={} region={} endpoint={:?}",
            config.bucket, config.region, config.endpoint_url
        );
        Ok(Self::from_client(
            aws_sdk_s3::Client::from_conf(builder.build()),
            config.bucket.clone(),
        ))
    }

    /// 🔧 Wrap an already-configured client. Handy when you brought your own.
    pub fn from_client(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn copy_source(&self, source_key: &str) -> String {
        format!(
            "{}/{}",
            self.bucket,
            utf8_percent_encode(source_key, &COPY_SOURCE_ENCODE_SET)
        )
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .with_context(|| format!("💀 ListObjectsV2 failed for s3://{}/{}", self.bucket, prefix))?;

        let records = response
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                let size = u64::try_from(object.size().unwrap_or(0)).unwrap_or(0);
                Some(SourceRecord::new(key, size))
            })
            .collect::<Vec<_>>();
        let next = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        trace!("📄 listed {} keys under '{}'", records.len(), prefix);
        Ok(ListPage { records, next })
    }

    async fn head(&self, key: &str) -> Result<u64> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 HEAD request failed for s3://{}/{}. Check: bucket name, key path, region, and credentials.",
                    self.bucket, key
                )
            })?;
        let length = response.content_length().unwrap_or(0);
        Ok(u64::try_from(length).unwrap_or(0))
    }

    async fn copy(&self, dest_key: &str, source_key: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(dest_key)
            .copy_source(self.copy_source(source_key))
            .send()
            .await
            .with_context(|| format!("💀 CopyObject failed: {} → {}", source_key, dest_key))?;
        Ok(())
    }

    async fn open_multipart(&self, dest_key: &str, content_type: &str) -> Result<UploadSession> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(dest_key)
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("💀 CreateMultipartUpload failed for s3://{}/{}", self.bucket, dest_key))?;
        let upload_id = response
            .upload_id()
            .context("💀 CreateMultipartUpload answered without an UploadId. Bold move.")?;
        Ok(UploadSession {
            key: dest_key.to_string(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn copy_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        source_key: &str,
    ) -> Result<String> {
        let response = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number_i32(part_number)?)
            .copy_source(self.copy_source(source_key))
            .send()
            .await
            .with_context(|| format!("💀 UploadPartCopy #{} failed for source {}", part_number, source_key))?;
        let etag = response
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .context("💀 UploadPartCopy answered without an ETag")?;
        Ok(strip_quotes(etag))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("💀 GetObject failed for s3://{}/{}", self.bucket, key))?;
        let body = response
            .body
            .collect()
            .await
            .with_context(|| format!("💀 body of s3://{}/{} stopped mid-sentence", self.bucket, key))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<String> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number_i32(part_number)?)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("💀 UploadPart #{} failed for {}", part_number, session.key))?;
        let etag = response
            .e_tag()
            .context("💀 UploadPart answered without an ETag")?;
        Ok(strip_quotes(etag))
    }

    async fn complete_multipart(&self, session: &UploadSession, parts: &[PartDescriptor]) -> Result<()> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                Ok(CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(part_number_i32(part.part_number)?)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("💀 CompleteMultipartUpload failed for {}", session.key))?;
        Ok(())
    }

    async fn abort_multipart(&self, session: &UploadSession) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .send()
            .await
            .with_context(|| format!("💀 AbortMultipartUpload failed for {}", session.key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::retry::RetryConfig;
    use aws_sdk_s3::config::{Credentials, Region};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> S3Store {
        let the_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(server.uri())
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .credentials_provider(Credentials::new("AKIDTEST", "not-a-secret", None, None, "wiremock"))
            .build();
        S3Store::from_client(aws_sdk_s3::Client::from_conf(the_config), "my-bucket")
    }

    #[test]
    fn the_one_where_weird_keys_get_escaped_but_slashes_survive() {
        let the_client = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("us-east-1"))
                .build(),
        );
        let the_store = S3Store::from_client(the_client, "b");
        assert_eq!(the_store.copy_source("dir/a b+c.json"), "b/dir/a%20b%2Bc.json");
        assert_eq!(the_store.copy_source("plain/key-1_x.~"), "b/plain/key-1_x.~");
    }

    #[test]
    fn the_one_where_config_defaults_to_the_florida_of_aws() {
        let the_config: S3StoreConfig = figment::Figment::new()
            .merge(figment::providers::Serialized::default("bucket", "some-bucket"))
            .extract()
            .expect("💀 bucket alone should be enough config");
        assert_eq!(the_config.region, "us-east-1");
        assert!(the_config.endpoint_url.is_none());
        assert!(!the_config.force_path_style);
    }

    #[tokio::test]
    async fn the_one_where_opening_an_upload_hands_back_the_id() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/my-bucket/out.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Bucket>my-bucket</Bucket><Key>out.json</Key><UploadId>upload-xyz</UploadId></InitiateMultipartUploadResult>"#,
            ))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_session = store_for(&the_server)
            .open_multipart("out.json", "application/json")
            .await
            .expect("💀 the mock said yes, the store should too");
        assert_eq!(the_session.upload_id, "upload-xyz");
        assert_eq!(the_session.key, "out.json");
    }

    #[tokio::test]
    async fn the_one_where_get_brings_the_whole_body_home() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/my-bucket/some_folder/thing1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"Thing1\n".to_vec()))
            .mount(&the_server)
            .await;

        let the_bytes = store_for(&the_server)
            .get("some_folder/thing1.json")
            .await
            .unwrap();
        assert_eq!(the_bytes, b"Thing1\n".to_vec());
    }

    #[tokio::test]
    async fn the_one_where_upload_part_etags_lose_their_quotes() {
        let the_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/my-bucket/out.json"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"abc123\""))
            .mount(&the_server)
            .await;

        let the_session = UploadSession {
            key: "out.json".to_string(),
            upload_id: "upload-xyz".to_string(),
        };
        let the_etag = store_for(&the_server)
            .upload_part(&the_session, 2, b"payload".to_vec())
            .await
            .unwrap();
        assert_eq!(the_etag, "abc123");
    }

    #[tokio::test]
    async fn the_one_where_listing_follows_the_continuation_breadcrumb() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/my-bucket/?$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>my-bucket</Name><Prefix>logs/</Prefix><KeyCount>2</KeyCount><MaxKeys>2</MaxKeys><IsTruncated>true</IsTruncated><NextContinuationToken>token-2</NextContinuationToken><Contents><Key>logs/a.json</Key><Size>10</Size></Contents><Contents><Key>logs/b.json</Key><Size>20</Size></Contents></ListBucketResult>"#,
            ))
            .mount(&the_server)
            .await;

        let the_page = store_for(&the_server).list("logs/", None).await.unwrap();
        assert_eq!(
            the_page.records,
            vec![SourceRecord::new("logs/a.json", 10), SourceRecord::new("logs/b.json", 20)]
        );
        assert_eq!(the_page.next.as_deref(), Some("token-2"));
    }

    #[tokio::test]
    async fn the_one_where_a_500_on_abort_comes_back_with_context() {
        let the_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>InternalError</Code><Message>boom</Message></Error>"#,
            ))
            .mount(&the_server)
            .await;

        let the_session = UploadSession {
            key: "out.json".to_string(),
            upload_id: "upload-xyz".to_string(),
        };
        let the_err = store_for(&the_server)
            .abort_multipart(&the_session)
            .await
            .unwrap_err();
        assert!(format!("{the_err:#}").contains("AbortMultipartUpload failed"));
    }
}
