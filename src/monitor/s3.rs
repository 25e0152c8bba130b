//! File-synchroniser keeping the local data directory the same as a bucket
//! in an S3-compatible object store.
//!
//! The storage URL is `[STORAGE-URL]/[BUCKET-NAME]/[PREFIX]` where the
//! prefix is optional and is stripped when resolving local file paths.
//! `sync` performs one blocking reconcile pass; `observe` keeps polling the
//! bucket listing and applies the created/removed deltas until the stop flag
//! is raised. Listener failures are logged and retried after a minute, never
//! propagated.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context as _, Result, ensure};
use futures::StreamExt as _;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use url::Url;

use super::{RegistryUpdater, sleep_checking_stop};
use crate::config::S3StorageConfig;
use crate::registry::DataRegistry;

const POLL_INTERVAL: Duration = Duration::from_millis(1500);
const FAILURE_BACKOFF: Duration = Duration::from_secs(60);

/// Remote object state used for change detection between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteObject {
    size: u64,
    e_tag: Option<String>,
}

pub struct S3DataSync {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    suffix: String,
    data_dir: PathBuf,
    updater: RegistryUpdater,
    runtime: tokio::runtime::Runtime,
}

impl S3DataSync {
    pub fn new(
        config: &S3StorageConfig,
        data_dir: &Path,
        registry: Arc<RwLock<DataRegistry>>,
    ) -> Result<Self> {
        let data_dir = data_dir
            .canonicalize()
            .with_context(|| format!("data_dir does not exist: {}", data_dir.display()))?;
        ensure!(data_dir.is_dir(), "data_dir is not a directory: {}", data_dir.display());

        let url_value = config.url.as_deref().context("S3 URL is not configured")?;
        let parsed = Url::parse(url_value).with_context(|| format!("Invalid S3 URL: {url_value}"))?;
        let scheme = parsed.scheme();
        ensure!(
            scheme == "http" || scheme == "https",
            "Invalid S3 URL scheme: {scheme}"
        );

        let host = parsed.host_str().context("Invalid S3 URL: missing host")?;
        let endpoint = match parsed.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        };

        let mut path_parts = parsed.path().trim_start_matches('/').splitn(2, '/');
        let bucket = path_parts
            .next()
            .filter(|part| !part.is_empty())
            .context("Invalid S3 URL: missing bucket name")?
            .to_owned();
        let mut prefix = path_parts.next().unwrap_or("").trim_start_matches('/').to_owned();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        let access_key = config.access_key.as_deref().context("S3 access_key is not configured")?;
        let secret_key = config.secret_key.as_deref().context("S3 secret_key is not configured")?;

        let store = AmazonS3Builder::new()
            .with_endpoint(&endpoint)
            .with_allow_http(scheme == "http")
            .with_virtual_hosted_style_request(false)
            .with_bucket_name(&bucket)
            .with_region(&config.region)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .build()
            .context("Failed to configure the S3 client")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create the S3 runtime")?;

        let updater = RegistryUpdater::new(&data_dir, registry);

        Ok(Self {
            store: Arc::new(store),
            bucket,
            prefix,
            suffix: config.path_suffix.clone(),
            data_dir,
            updater,
            runtime,
        })
    }

    // ---------------------------------------------------------------- //
    // Utility methods
    // ---------------------------------------------------------------- //

    fn local_path_for_object(&self, object_name: &str) -> PathBuf {
        let item_path = object_name.strip_prefix(&self.prefix).unwrap_or(object_name);
        self.data_dir.join(item_path)
    }

    fn download_file(&self, local_path: &Path, object_path: &ObjectPath) -> Result<()> {
        tracing::info!("Downloading {object_path} -> {}", local_path.display());
        let bytes = self.runtime.block_on(async {
            let result = self.store.get(object_path).await?;
            result.bytes().await
        })?;
        std::fs::write(local_path, &bytes)
            .with_context(|| format!("Failed to write {}", local_path.display()))?;
        self.updater.on_new_file(local_path);
        Ok(())
    }

    /// Removes a file and its directory when it becomes empty, walking the
    /// empty parents all the way up to (but not including) the data
    /// directory.
    fn remove_file(&self, file_path: &Path) -> Result<()> {
        if file_path.is_file() {
            self.updater.on_removed_file(file_path);
        }
        std::fs::remove_file(file_path)
            .with_context(|| format!("Failed to delete {}", file_path.display()))?;

        let mut parent = file_path.parent();
        while let Some(dir) = parent {
            if dir == self.data_dir || !is_empty_dir(dir) {
                break;
            }
            std::fs::remove_dir(dir).ok();
            parent = dir.parent();
        }
        Ok(())
    }

    fn list_objects(&self) -> Result<Vec<ObjectMeta>> {
        let prefix = (!self.prefix.is_empty())
            .then(|| ObjectPath::from(self.prefix.trim_end_matches('/')));
        self.runtime.block_on(async {
            let mut stream = self.store.list(prefix.as_ref());
            let mut objects = Vec::new();
            while let Some(item) = stream.next().await {
                objects.push(item.context("Object listing failed")?);
            }
            Ok(objects)
        })
    }

    // ---------------------------------------------------------------- //
    // Sync logic
    // ---------------------------------------------------------------- //

    /// One full reconcile pass: download what is missing or different,
    /// delete what the bucket no longer holds, prune empty directories.
    /// Running it twice without bucket changes downloads nothing.
    pub fn sync(&self) -> Result<()> {
        tracing::info!(
            "Starting full sync from bucket={} prefix={} to {}",
            self.bucket,
            if self.prefix.is_empty() { "(root)" } else { &self.prefix },
            self.data_dir.display()
        );

        let objects = self.list_objects()?;
        let mut seen_local_paths = HashSet::new();

        for obj in &objects {
            let local_path = self.local_path_for_object(obj.location.as_ref());
            seen_local_paths.insert(local_path.clone());

            if let Some(parent) = local_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }

            if self.needs_download(&local_path, obj)? {
                self.download_file(&local_path, &obj.location)?;
            }
        }

        // Remove stale local files:
        let mut local_files = Vec::new();
        collect_files(&self.data_dir, &mut local_files);
        for path in local_files {
            if !seen_local_paths.contains(&path) {
                tracing::info!("Deleting local file [{}] (not present in S3)", path.display());
                self.remove_file(&path)?;
            }
        }

        prune_empty_dirs(&self.data_dir, true);

        tracing::info!("Full sync completed");
        Ok(())
    }

    fn needs_download(&self, local_path: &Path, obj: &ObjectMeta) -> Result<bool> {
        if !local_path.exists() {
            return Ok(true);
        }

        let local_size = std::fs::metadata(local_path)
            .with_context(|| format!("Failed to stat {}", local_path.display()))?
            .len();
        if local_size != obj.size {
            return Ok(true);
        }

        match non_multipart_etag(obj.e_tag.as_deref()) {
            Some(etag) => Ok(md5sum(local_path)? != etag),
            None => {
                tracing::warn!(
                    "Multipart ETag [{:?}] for [{}], skipping MD5 check",
                    obj.e_tag,
                    obj.location
                );
                Ok(false)
            }
        }
    }

    // ---------------------------------------------------------------- //
    // Observe logic
    // ---------------------------------------------------------------- //

    /// Polls the bucket listing and keeps the local directory in sync until
    /// the stop flag is raised.
    pub fn observe(&self, stop: &AtomicBool) {
        tracing::info!(
            "Observing S3 storage for events in bucket=[{}]; path-prefix=[{}].",
            self.bucket,
            if self.prefix.is_empty() { "(root)" } else { &self.prefix }
        );

        let mut snapshot: Option<HashMap<String, RemoteObject>> = None;

        while !stop.load(Ordering::Relaxed) {
            if sleep_checking_stop(POLL_INTERVAL, stop) {
                break;
            }

            let current = match self.poll_bucket() {
                Ok(current) => current,
                Err(e) => {
                    tracing::error!("S3 event-listener error: {e:#}");
                    if sleep_checking_stop(FAILURE_BACKOFF, stop) {
                        break;
                    }
                    continue;
                }
            };

            if let Some(previous) = &snapshot
                && let Err(e) = self.apply_delta(previous, &current)
            {
                tracing::error!("S3 event-listener error: {e:#}");
                if sleep_checking_stop(FAILURE_BACKOFF, stop) {
                    break;
                }
                continue;
            }

            snapshot = Some(current);
        }

        tracing::info!("S3 event observer stopped");
    }

    fn poll_bucket(&self) -> Result<HashMap<String, RemoteObject>> {
        let objects = self.list_objects()?;
        Ok(objects
            .into_iter()
            .filter(|obj| obj.location.as_ref().ends_with(&self.suffix))
            .map(|obj| {
                let key = obj.location.as_ref().to_owned();
                (key, RemoteObject { size: obj.size, e_tag: obj.e_tag })
            })
            .collect())
    }

    fn apply_delta(
        &self,
        previous: &HashMap<String, RemoteObject>,
        current: &HashMap<String, RemoteObject>,
    ) -> Result<()> {
        for (key, state) in current {
            if previous.get(key) != Some(state) {
                tracing::info!("S3 created: {key}");
                let local_path = self.local_path_for_object(key);
                if let Some(parent) = local_path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                self.download_file(&local_path, &ObjectPath::from(key.as_str()))?;
            }
        }

        for key in previous.keys() {
            if !current.contains_key(key) {
                tracing::info!("S3 removed: {key}");
                let local_path = self.local_path_for_object(key);
                if local_path.exists() {
                    self.remove_file(&local_path)?;
                }
            }
        }

        Ok(())
    }
}

/// A usable MD5 from an ETag, or `None` for missing/multipart tags
/// (multipart ETags contain a `-` and are not object checksums).
fn non_multipart_etag(e_tag: Option<&str>) -> Option<String> {
    let tag = e_tag?.trim_matches('"');
    (!tag.contains('-')).then(|| tag.to_owned())
}

fn md5sum(path: &Path) -> Result<String> {
    use std::io::Read as _;

    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else if path.is_file() {
            files.push(path);
        }
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut entries| entries.next().is_none()).unwrap_or(false)
}

/// Removes empty directories bottom-up. The root itself is kept.
fn prune_empty_dirs(dir: &Path, is_root: bool) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };

    let mut has_content = false;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if !prune_empty_dirs(&path, false) {
                has_content = true;
            }
        } else {
            has_content = true;
        }
    }

    if !has_content && !is_root {
        std::fs::remove_dir(dir).ok();
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_multipart_etag() {
        assert_eq!(
            non_multipart_etag(Some("\"0123abcd\"")).as_deref(),
            Some("0123abcd")
        );
        assert_eq!(non_multipart_etag(Some("\"0123abcd-4\"")), None);
        assert_eq!(non_multipart_etag(None), None);
    }

    #[test]
    fn test_md5sum_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"hello world").unwrap();
        assert_eq!(md5sum(&file).unwrap(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_prune_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        prune_empty_dirs(dir.path(), true);
        assert!(dir.path().exists());
        assert!(!dir.path().join("a").exists());
    }
}
