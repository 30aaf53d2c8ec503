//! S3 backend
//!
//! [`S3Backend`] implements [`Backend`] on top of `aws-sdk-s3` against AWS
//! or any S3-compatible store.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use ctlog_s3::{Backend, S3Backend, UploadOptions};
//! use ctlog_s3::config::S3Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = S3Config::new("us-east-1", "my-log");
//! config.key_prefix = "shard-a/".into();
//!
//! let backend = S3Backend::new(&config).await?;
//! let opts = UploadOptions::new().compress(true).immutable(true);
//! backend.upload("tile/0/000", Bytes::from_static(b"hello"), &opts).await?;
//!
//! let data = backend.fetch("tile/0/000").await?;
//! assert_eq!(&data[..], b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! Every operation emits one debug event:
//!
//! | Operation | Message | Fields |
//! |-----------|---------|--------|
//! | upload | `S3 PUT` | key, size, compress, content_type, immutable, hedged, winner, elapsed, error |
//! | fetch | `S3 GET` | key, size, encoding, error |
//! | list | `S3 LIST` | prefix, count, error |
//! | copy | `S3 COPY` | from, to, error |
//! | delete | `S3 DELETE` | key, error |

mod credentials;
pub mod instrument;

pub use credentials::{CredentialsError, CredentialsProvider};
pub use instrument::RequestMetricsInterceptor;

use crate::backend::Backend;
use crate::config::S3Config;
use crate::metrics::S3Metrics;
use crate::upload::compress::{self, GZIP_ENCODING};
use crate::upload::{Hedge, UploadOptions};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{Region, RequestChecksumCalculation, ResponseChecksumValidation};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::Bytes;
use prometheus::core::Collector;
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, Instrument};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Backend operation, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Upload,
    Fetch,
    List,
    Copy,
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Upload => "upload",
            Op::Fetch => "fetch",
            Op::List => "list",
            Op::Copy => "copy",
            Op::Delete => "delete",
        })
    }
}

/// S3 backend errors
///
/// `key` is the caller's key, without the configured prefix.
#[derive(Error, Debug)]
pub enum S3BackendError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("failed to compress {key:?}: {source}")]
    Compress {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to {op} {key:?} on S3: {message}")]
    Network {
        op: Op,
        key: String,
        /// HTTP status, when the store answered at all
        status: Option<u16>,
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to decompress {key:?} from S3: {source}")]
    Decode {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {key:?} from S3: {source}")]
    Read {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to {op} {key:?} from S3: {reason}")]
    Protocol { op: Op, key: String, reason: String },
}

impl S3BackendError {
    fn network<E>(op: Op, key: &str, err: SdkError<E, HttpResponse>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            op,
            key: key.to_string(),
            status: err.raw_response().map(|resp| resp.status().as_u16()),
            message: DisplayErrorContext(&err).to_string(),
            source: Box::new(err),
        }
    }

    fn protocol(op: Op, key: &str, reason: impl Into<String>) -> Self {
        Self::Protocol {
            op,
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP status returned by the store, if the error came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether a conditional write was rejected because the object exists
    pub fn is_precondition_failed(&self) -> bool {
        self.status() == Some(412)
    }
}

/// A fully prepared PUT, shared by the primary and hedge attempts
struct PutRequest<'a> {
    key: String,
    body: Bytes,
    content_type: &'a str,
    content_encoding: Option<&'static str>,
    cache_control: Option<&'static str>,
    /// Send `If-Match: ""` so the write only succeeds if nothing exists yet
    if_absent: bool,
}

/// S3-backed object store
pub struct S3Backend {
    client: Client,
    bucket: String,
    key_prefix: String,
    endpoint: Option<String>,
    conditional_writes: bool,
    hedge: Hedge,
    metrics: S3Metrics,
}

impl fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .field("endpoint", &self.endpoint)
            .field("conditional_writes", &self.conditional_writes)
            .field("hedge_delay", &self.hedge.delay())
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a backend and its instrumented client from configuration
    pub async fn new(config: &S3Config) -> Result<Self, S3BackendError> {
        config
            .validate()
            .map_err(|e| S3BackendError::Config(e.to_string()))?;
        let credentials = CredentialsProvider::from_config(config)
            .map_err(|e| S3BackendError::Config(e.to_string()))?;
        let metrics = S3Metrics::new()
            .map_err(|e| S3BackendError::Config(format!("failed to create metrics: {}", e)))?;

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let Some(credentials) = credentials {
            loader = loader.credentials_provider(credentials);
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .retry_config(
                RetryConfig::standard()
                    .with_max_attempts(config.max_attempts)
                    .with_max_backoff(config.max_backoff()),
            )
            // Checksums would rewrite bodies some S3-compatible stores can't read back.
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .force_path_style(config.force_path_style)
            .interceptor(RequestMetricsInterceptor::new(metrics.clone()));
        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        let hedge = Hedge::new(config.hedge_delay())
            .with_counters(metrics.hedges.clone(), metrics.hedge_wins.clone());

        debug!(
            region = %config.region,
            bucket = %config.bucket,
            endpoint = config.endpoint.as_deref().unwrap_or(""),
            key_prefix = %config.key_prefix,
            "created S3 backend"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.clone(),
            endpoint: config.endpoint.clone(),
            conditional_writes: config.uses_conditional_writes(),
            hedge,
            metrics,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// The collectors themselves, for inspection
    pub fn s3_metrics(&self) -> &S3Metrics {
        &self.metrics
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// One PUT attempt
    async fn put_object(&self, request: &PutRequest<'_>, key: &str) -> Result<(), S3BackendError> {
        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .body(ByteStream::from(request.body.clone()))
            .content_length(request.body.len() as i64)
            .content_type(request.content_type);
        if let Some(encoding) = request.content_encoding {
            put = put.content_encoding(encoding);
        }
        if let Some(cache_control) = request.cache_control {
            put = put.cache_control(cache_control);
        }

        let result = if request.if_absent {
            // The fluent `if_match` setter drops empty values.
            put.customize()
                .mutate_request(|req| {
                    req.headers_mut().insert("if-match", "");
                })
                .send()
                .await
        } else {
            put.send().await
        };

        result
            .map(|_| ())
            .map_err(|e| S3BackendError::network(Op::Upload, key, e))
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        opts: &UploadOptions,
    ) -> Result<(), S3BackendError> {
        let start = Instant::now();

        let body = if opts.compress {
            let compressed = compress::gzip(&data).map_err(|source| S3BackendError::Compress {
                key: key.to_string(),
                source,
            })?;
            self.metrics
                .compress_ratio
                .observe(compress::compression_ratio(compressed.len(), data.len()));
            Bytes::from(compressed)
        } else {
            data
        };

        let request = PutRequest {
            key: self.object_key(key),
            body,
            content_type: opts.resolved_content_type(),
            content_encoding: opts.compress.then_some(GZIP_ENCODING),
            cache_control: opts.cache_control(),
            if_absent: opts.immutable && self.conditional_writes,
        };

        let raced = self
            .hedge
            .race(|| self.put_object(&request, key))
            .instrument(tracing::debug_span!("s3_put", key))
            .await;

        self.metrics.upload_size.observe(request.body.len() as f64);

        match &raced.result {
            Ok(()) => debug!(
                key,
                size = request.body.len(),
                compress = opts.compress,
                content_type = request.content_type,
                immutable = opts.immutable,
                hedged = raced.hedged,
                winner = raced.winner.as_str(),
                elapsed = ?start.elapsed(),
                "S3 PUT"
            ),
            Err(e) => debug!(
                key,
                size = request.body.len(),
                compress = opts.compress,
                content_type = request.content_type,
                immutable = opts.immutable,
                hedged = raced.hedged,
                winner = raced.winner.as_str(),
                elapsed = ?start.elapsed(),
                error = %e,
                "S3 PUT"
            ),
        }

        raced.result
    }

    async fn fetch(&self, key: &str) -> Result<Bytes, S3BackendError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let err = S3BackendError::network(Op::Fetch, key, e);
                debug!(key, error = %err, "S3 GET");
                return Err(err);
            }
        };

        let encoding = output.content_encoding().map(str::to_owned);
        debug!(
            key,
            size = output.content_length().unwrap_or_default(),
            encoding = encoding.as_deref().unwrap_or(""),
            "S3 GET"
        );

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| S3BackendError::Read {
                key: key.to_string(),
                source: Box::new(e),
            })?
            .into_bytes();

        if encoding.as_deref() == Some(GZIP_ENCODING) {
            let data = compress::gunzip(&body).map_err(|source| S3BackendError::Decode {
                key: key.to_string(),
                source,
            })?;
            return Ok(Bytes::from(data));
        }
        Ok(body)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, S3BackendError> {
        let full_prefix = self.object_key(prefix);
        let output = match self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&full_prefix)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let err = S3BackendError::network(Op::List, prefix, e);
                debug!(prefix, error = %err, "S3 LIST");
                return Err(err);
            }
        };
        debug!(prefix, count = output.contents().len(), "S3 LIST");

        let mut keys = Vec::with_capacity(output.contents().len());
        for object in output.contents() {
            let key = match object.key() {
                Some(key) if !key.is_empty() => key,
                _ => return Err(S3BackendError::protocol(Op::List, prefix, "nil key")),
            };
            if !key.starts_with(&full_prefix) {
                return Err(S3BackendError::protocol(
                    Op::List,
                    prefix,
                    format!("strange response {:?}", key),
                ));
            }
            keys.push(key[self.key_prefix.len()..].to_string());
        }
        if output.is_truncated().unwrap_or(false) {
            return Err(S3BackendError::protocol(Op::List, prefix, "response truncated"));
        }
        Ok(keys)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), S3BackendError> {
        let result = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, self.object_key(from)))
            .key(self.object_key(to))
            .send()
            .await;

        if let Err(e) = result {
            let err = S3BackendError::network(Op::Copy, &format!("{} -> {}", from, to), e);
            debug!(from, to, error = %err, "S3 COPY");
            return Err(err);
        }
        debug!(from, to, "S3 COPY");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), S3BackendError> {
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;

        if let Err(e) = result {
            let err = S3BackendError::network(Op::Delete, key, e);
            debug!(key, error = %err, "S3 DELETE");
            return Err(err);
        }
        debug!(key, "S3 DELETE");
        Ok(())
    }

    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        self.metrics.collectors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend(prefix: &str) -> S3Backend {
        let mut config = S3Config::new("us-east-1", "test-bucket");
        config.endpoint = Some("http://127.0.0.1:9".into());
        config.key_prefix = prefix.into();
        config.access_key = Some("AKID".into());
        config.secret_key = Some("SECRET".into());
        S3Backend::new(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_object_key_prefixing() {
        let prefixed = backend("log1/").await;
        assert_eq!(prefixed.object_key("tile/0/000"), "log1/tile/0/000");
        assert_eq!(prefixed.object_key(""), "log1/");

        let bare = backend("").await;
        assert_eq!(bare.object_key("checkpoint"), "checkpoint");
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = S3Config::new("us-east-1", "");
        let err = S3Backend::new(&config).await.unwrap_err();
        assert!(matches!(err, S3BackendError::Config(_)));
    }

    #[tokio::test]
    async fn test_new_rejects_half_credentials() {
        let mut config = S3Config::new("us-east-1", "bucket");
        config.access_key = Some("AKID".into());
        let err = S3Backend::new(&config).await.unwrap_err();
        assert!(matches!(err, S3BackendError::Config(_)));
        assert!(err.to_string().contains("secret_key"));
    }

    #[tokio::test]
    async fn test_conditional_writes_follow_endpoint() {
        let plain = backend("").await;
        assert!(!plain.conditional_writes);

        let mut config = S3Config::new("auto", "bucket");
        config.endpoint = Some(crate::config::TIGRIS_ENDPOINT.into());
        config.access_key = Some("AKID".into());
        config.secret_key = Some("SECRET".into());
        let tigris = S3Backend::new(&config).await.unwrap();
        assert!(tigris.conditional_writes);
    }

    #[tokio::test]
    async fn test_metrics_returns_six_collectors() {
        let s3 = backend("").await;
        assert_eq!(Backend::metrics(&s3).len(), 6);
    }

    #[test]
    fn test_op_display() {
        assert_eq!(Op::Upload.to_string(), "upload");
        assert_eq!(Op::Delete.to_string(), "delete");
    }

    #[test]
    fn test_error_messages_carry_op_and_key() {
        let err = S3BackendError::protocol(Op::List, "tile/", "response truncated");
        assert_eq!(
            err.to_string(),
            "failed to list \"tile/\" from S3: response truncated"
        );

        let err = S3BackendError::Network {
            op: Op::Upload,
            key: "checkpoint".into(),
            status: Some(412),
            message: "PreconditionFailed".into(),
            source: "PreconditionFailed".into(),
        };
        assert!(err.to_string().contains("upload \"checkpoint\""));
        assert!(err.is_precondition_failed());
        assert_eq!(err.status(), Some(412));
    }

    #[test]
    fn test_non_network_errors_have_no_status() {
        let err = S3BackendError::Decode {
            key: "k".into(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "bad gzip"),
        };
        assert_eq!(err.status(), None);
        assert!(!err.is_precondition_failed());
    }
}
