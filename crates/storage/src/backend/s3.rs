//! S3-compatible storage backend.
//!
//! Maps the S3 key space onto a directory tree: a listing of `dir` is a
//! `ListObjectsV2` call with prefix `dir/` and delimiter `/`, where common
//! prefixes become directories and objects become files. Works with AWS S3,
//! Backblaze B2, MinIO and other S3-compatible services.
//!
//! Credentials are provided explicitly via the mount's configuration. They
//! never appear in the storage identifier or in error messages.

use crate::backend::EntryStream;
use crate::entry::Entry;
use crate::error::{ErrorKind, Result};
use crate::path::{is_valid_name, normalize as normalize_path, to_storage_string};
use crate::StorageBackend;
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    primitives::DateTime,
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::UtcDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// Connection settings for an S3 mount.
#[derive(Debug, Clone)]
pub struct S3Options {
    pub bucket: String,
    /// Optional key prefix (acts as the storage root)
    pub prefix: Option<String>,
    /// AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    pub region: String,
    /// Custom endpoint URL for S3-compatible services
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}

/// S3-compatible storage backend.
///
/// # Examples
///
/// ```no_run
/// use filecache_storage::backend::{S3Backend, S3Options};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new("archive", S3Options {
///     bucket: "my-bucket".to_string(),
///     prefix: Some("library/".to_string()),
///     region: "us-west-004".to_string(),
///     endpoint: Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     key_id: "access_key_id".to_string(),
///     key_secret: "secret_access_key".to_string(),
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    identifier: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    pub fn new(name: impl Into<String>, options: S3Options) -> Result<Self> {
        let prefix = match options.prefix.as_deref().map(normalize_path).transpose()? {
            Some(p) if p.as_os_str().is_empty() => None,
            Some(p) => Some(to_storage_string(&p).ok_or_raise(|| ErrorKind::InvalidPath(p.clone()))?),
            None => None,
        };
        let identifier = match &prefix {
            Some(prefix) => format!("amazon::{}/{}", options.bucket, prefix),
            None => format!("amazon::{}", options.bucket),
        };
        let credentials = Credentials::new(options.key_id, options.key_secret, None, None, "filecache-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(options.region))
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = options.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            identifier,
            client: Client::from_conf(config_builder.build()),
            bucket: options.bucket,
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.rate_limiter)
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    async fn list_page(&self, dir: &Path, token: Option<String>) -> Result<ListObjectsV2Output> {
        let _permit = self.acquire_permit().await?;
        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(directory_prefix(self.prefix.as_deref(), dir)?)
            .delimiter("/")
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| exn::Exn::from(map_sdk_error(e, dir)))
    }

    /// Turn one page of a listing into entries (and malformed-entry errors).
    fn page_entries(&self, dir: &Path, page: &ListObjectsV2Output) -> Vec<Result<Entry>> {
        let mut out = Vec::new();
        for common in page.common_prefixes() {
            let Some(key) = common.prefix() else { continue };
            out.push(self.child_path(dir, key.trim_end_matches('/')).map(|path| Entry::directory(path, None)));
        }
        for object in page.contents() {
            let Some(key) = object.key() else { continue };
            // Zero-byte "directory marker" objects.
            if key.ends_with('/') {
                continue;
            }
            let entry = self.child_path(dir, key).and_then(|path| {
                let mtime = object.last_modified().map(parse_datetime).transpose()?.unwrap_or(UtcDateTime::UNIX_EPOCH);
                let size = object.size().unwrap_or(0).max(0) as u64;
                let entry = Entry::file(path, size, mtime);
                Ok(match object.e_tag() {
                    Some(etag) => entry.with_etag(etag.trim_matches('"')),
                    None => entry,
                })
            });
            out.push(entry);
        }
        out
    }

    fn child_path(&self, dir: &Path, key: &str) -> Result<PathBuf> {
        let relative = relative_key(self.prefix.as_deref(), key);
        let name = relative.rsplit('/').next().unwrap_or_default();
        if !is_valid_name(name) {
            exn::bail!(ErrorKind::MalformedEntry(dir.join(name)));
        }
        Ok(dir.join(name))
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn list_stream<'a>(&'a self, dir: &'a Path) -> EntryStream<'a> {
        let dir = match normalize_path(dir) {
            Ok(dir) => dir,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        Box::pin(stream! {
            let mut token = None;
            let mut seen_any = false;
            loop {
                let page = match self.list_page(&dir, token.take()).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for entry in self.page_entries(&dir, &page) {
                    seen_any = true;
                    yield entry;
                }
                match page.next_continuation_token() {
                    Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                    _ => break,
                }
            }
            // S3 has no empty directories: nothing under the prefix means
            // the directory doesn't exist (the root always does).
            if !seen_any && !dir.as_os_str().is_empty() {
                yield Err(exn::Exn::from(ErrorKind::NotFound(dir.clone())));
            }
        })
    }

    async fn stat(&self, path: &Path) -> Result<Entry> {
        let path = normalize_path(path)?;
        if path.as_os_str().is_empty() {
            return Ok(Entry::directory(path, None));
        }
        let key = object_key(self.prefix.as_deref(), &path)?;
        let head = {
            let _permit = self.acquire_permit().await?;
            self.client.head_object().bucket(&self.bucket).key(&key).send().await
        };
        match head {
            Ok(head) => {
                let mtime = head.last_modified().map(parse_datetime).transpose()?.unwrap_or(UtcDateTime::UNIX_EPOCH);
                let size = head.content_length().unwrap_or(0).max(0) as u64;
                let mut entry = Entry::file(&path, size, mtime);
                if let Some(etag) = head.e_tag() {
                    entry = entry.with_etag(etag.trim_matches('"'));
                }
                if let Some(mimetype) = head.content_type()
                    && mimetype != "binary/octet-stream"
                {
                    entry = entry.with_mimetype(mimetype);
                }
                Ok(entry)
            },
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => {
                // Not an object; it is a directory if anything lives below it.
                let probe = self.list_page(&path, None).await?;
                match probe.common_prefixes().is_empty() && probe.contents().is_empty() {
                    true => exn::bail!(ErrorKind::NotFound(path)),
                    false => Ok(Entry::directory(path, None)),
                }
            },
            Err(e) => exn::bail!(map_sdk_error(e, &path)),
        }
    }
}

fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, path: &Path) -> ErrorKind
where
    E: std::error::Error + 'static,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            ErrorKind::Unavailable(format!("{}: {}", path.display(), err))
        },
        SdkError::ServiceError(service) if service.raw().status().as_u16() == 403 => {
            ErrorKind::PermissionDenied(path.to_path_buf())
        },
        _ => ErrorKind::BackendError(format!("{}: {}", path.display(), err)),
    }
}

/// Convert AWS DateTime to UtcDateTime.
fn parse_datetime(dt: &DateTime) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(dt.as_nanos())
        .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
}

/// Full object key for a path below the storage root.
fn object_key(prefix: Option<&str>, path: &Path) -> Result<String> {
    let path_str = to_storage_string(path).ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?;
    Ok(match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path_str),
        None => path_str,
    })
}

/// Key prefix to list the children of `dir`: empty or ending in `/`.
fn directory_prefix(prefix: Option<&str>, dir: &Path) -> Result<String> {
    let key = match dir.as_os_str().is_empty() {
        true => prefix.map(|p| p.trim_end_matches('/').to_string()).unwrap_or_default(),
        false => object_key(prefix, dir)?,
    };
    Ok(match key.is_empty() {
        true => key,
        false => format!("{key}/"),
    })
}

/// Strip the configured prefix from an S3 key.
fn relative_key<'k>(prefix: Option<&str>, key: &'k str) -> &'k str {
    match prefix {
        Some(prefix) => {
            let prefix_normalized = prefix.trim_end_matches('/');
            key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
        },
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "docs/report.pdf", "docs/report.pdf")]
    #[case(Some("library"), "docs/report.pdf", "library/docs/report.pdf")]
    #[case(Some("library/"), "docs/report.pdf", "library/docs/report.pdf")]
    fn test_object_key(#[case] prefix: Option<&str>, #[case] path: &str, #[case] expected: &str) {
        assert_eq!(object_key(prefix, Path::new(path)).unwrap(), expected);
    }

    #[rstest]
    #[case(None, "", "")]
    #[case(None, "docs", "docs/")]
    #[case(Some("library"), "", "library/")]
    #[case(Some("library/"), "docs/inner", "library/docs/inner/")]
    fn test_directory_prefix(#[case] prefix: Option<&str>, #[case] dir: &str, #[case] expected: &str) {
        assert_eq!(directory_prefix(prefix, Path::new(dir)).unwrap(), expected);
    }

    #[rstest]
    #[case(None, "docs/report.pdf", "docs/report.pdf")]
    #[case(Some("library"), "library/docs/report.pdf", "docs/report.pdf")]
    #[case(Some("library/"), "library/docs/report.pdf", "docs/report.pdf")]
    fn test_relative_key(#[case] prefix: Option<&str>, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(relative_key(prefix, key), expected);
    }

    fn backend(prefix: Option<&str>) -> S3Backend {
        S3Backend::new("archive", S3Options {
            bucket: "bucket".to_string(),
            prefix: prefix.map(str::to_string),
            region: "us-east-1".to_string(),
            endpoint: Some("http://127.0.0.1:9".to_string()),
            key_id: "id".to_string(),
            key_secret: "secret".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_identifier_never_contains_credentials() {
        assert_eq!(backend(None).identifier(), "amazon::bucket");
        assert_eq!(backend(Some("library/")).identifier(), "amazon::bucket/library");
        assert!(!backend(Some("library")).identifier().contains("secret"));
    }

    #[test]
    fn test_child_path_rejects_bad_names() {
        let backend = backend(Some("library"));
        assert_eq!(backend.child_path(Path::new("docs"), "library/docs/a.txt").unwrap(), Path::new("docs/a.txt"));
        let err = backend.child_path(Path::new("docs"), "library/docs/..").unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedEntry(_)));
    }
}
