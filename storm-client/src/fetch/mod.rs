use std::path::{Path, PathBuf};

use base64::Engine;
use sha2::Digest;
use storm_types::{ChecksumAlgorithm, ChecksumSpec, ExtractionMode, JarSpec};
use thiserror::Error;

/// Failure modes for materializing a topology's JAR reference (spec.md
/// §4.2). Connection-class errors are retried with backoff by the caller;
/// checksum and decode failures are fatal.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("decode failure: {0}")]
    DecodeFailure(String),
    #[error("io error: {0}")]
    Io(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::SourceUnreachable(_))
    }
}

/// What the reconciler must arrange to get a container-image JAR onto the
/// shared volume a worker pod can read from (spec.md §4.2: "the mechanics
/// are delegated to the reconciliation framework as side-effect requests").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub image: String,
    pub path_in_image: String,
    pub mode: ExtractionMode,
    pub pull_secrets: Vec<String>,
    pub dest_path: PathBuf,
    /// Set when the original mode was `sidecar` (§9 Open Question 2):
    /// the reconciler must give the extraction container
    /// `restartPolicy: Always` so it stays alive for the worker's lifetime,
    /// even though it is otherwise shaped like an init container.
    pub restart_always: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Bytes are already on disk at a stable path.
    Ready(PathBuf),
    /// Caller must arrange the extraction side effect and re-fetch once the
    /// shared volume is populated.
    PendingExtraction(ExtractionRequest),
}

/// Materializes a topology's `jar` reference into a local, readable file
/// (spec.md §4.2). Lives alongside the RPC client because topology
/// submission needs both: a resolved JAR path and a connected Nimbus.
pub struct ArtifactFetcher {
    http: reqwest::Client,
    cache_root: PathBuf,
}

impl ArtifactFetcher {
    pub fn new(cache_root: PathBuf) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("reqwest client builds with default TLS backend"),
            cache_root,
        }
    }

    /// Stable path for one topology version's artifact: stable for the
    /// lifetime of that version, never rewritten in place, and distinct
    /// from every other version's path (spec.md §4.2 "Guarantees").
    pub fn stable_path(&self, namespace: &str, name: &str, version: &str) -> PathBuf {
        self.cache_root.join(namespace).join(name).join(version).join("topology.jar")
    }

    pub async fn fetch(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
        jar: &JarSpec,
    ) -> Result<FetchOutcome, FetchError> {
        let dest = self.stable_path(namespace, name, version);
        if dest.is_file() {
            return Ok(FetchOutcome::Ready(dest));
        }

        if let Some(url_spec) = &jar.url {
            let bytes = self.fetch_url(&url_spec.url).await?;
            verify_checksum(&bytes, url_spec.checksum.as_ref())?;
            write_atomically(&dest, &bytes).await?;
            return Ok(FetchOutcome::Ready(dest));
        }

        if let Some(inline) = &jar.inline {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(inline.as_bytes())
                .map_err(|e| FetchError::DecodeFailure(e.to_string()))?;
            write_atomically(&dest, &bytes).await?;
            return Ok(FetchOutcome::Ready(dest));
        }

        if let Some(container) = &jar.container {
            let mode_normalized = match container.extraction_mode {
                ExtractionMode::Sidecar => ExtractionMode::InitContainer,
                other => other,
            };
            return Ok(FetchOutcome::PendingExtraction(ExtractionRequest {
                image: container.image.clone(),
                path_in_image: container.path.clone(),
                mode: mode_normalized,
                pull_secrets: container.pull_secrets.clone(),
                dest_path: dest,
                restart_always: matches!(container.extraction_mode, ExtractionMode::Sidecar),
            }));
        }

        Err(FetchError::DecodeFailure("jar spec has no url, container, or inline source set".into()))
    }

    /// Re-check a path the reconciler extracted to out-of-band (after an
    /// extraction job/initContainer/sidecar has run), verifying its
    /// checksum if one was declared on the original container spec.
    pub async fn verify_extracted(&self, path: &Path, checksum: Option<&ChecksumSpec>) -> Result<(), FetchError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| FetchError::Io(e.to_string()))?;
        verify_checksum(&bytes, checksum)
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                FetchError::SourceUnreachable(e.to_string())
            } else {
                FetchError::SourceUnreachable(e.to_string())
            }
        })?;
        match response.status() {
            reqwest::StatusCode::OK => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| FetchError::SourceUnreachable(e.to_string())),
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::SourceNotFound(url.to_string())),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(FetchError::Unauthorized(url.to_string()))
            }
            status => Err(FetchError::SourceUnreachable(format!("unexpected status {status}"))),
        }
    }
}

fn verify_checksum(bytes: &[u8], checksum: Option<&ChecksumSpec>) -> Result<(), FetchError> {
    let Some(checksum) = checksum else { return Ok(()) };
    let actual = match checksum.algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = sha2::Sha256::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
        ChecksumAlgorithm::Md5 => {
            let digest = md5::compute(bytes);
            hex::encode(digest.0)
        }
    };
    if actual.eq_ignore_ascii_case(&checksum.value) {
        Ok(())
    } else {
        Err(FetchError::ChecksumMismatch { expected: checksum.value.clone(), actual })
    }
}

async fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let parent = dest.parent().expect("dest always has a parent under cache_root");
    tokio::fs::create_dir_all(parent).await.map_err(|e| FetchError::Io(e.to_string()))?;
    let tmp_path = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp_path, bytes).await.map_err(|e| FetchError::Io(e.to_string()))?;
    tokio::fs::rename(&tmp_path, dest).await.map_err(|e| FetchError::Io(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_types::{ChecksumAlgorithm, ChecksumSpec, UrlJarSpec};

    fn fetcher() -> (ArtifactFetcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (ArtifactFetcher::new(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn inline_jar_is_written_to_stable_path() {
        let (fetcher, _dir) = fetcher();
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello jar");
        let jar = JarSpec { url: None, container: None, inline: Some(encoded) };
        let outcome = fetcher.fetch("ns", "topo", "v1", &jar).await.unwrap();
        let path = match outcome {
            FetchOutcome::Ready(p) => p,
            other => panic!("expected Ready, got {other:?}"),
        };
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"hello jar");
    }

    #[tokio::test]
    async fn different_versions_get_different_stable_paths() {
        let (fetcher, _dir) = fetcher();
        let p1 = fetcher.stable_path("ns", "topo", "v1");
        let p2 = fetcher.stable_path("ns", "topo", "v2");
        assert_ne!(p1, p2);
    }

    #[tokio::test]
    async fn inline_jar_checksum_mismatch_is_fatal() {
        let (fetcher, _dir) = fetcher();
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello jar");
        // inline jars don't carry a checksum field in JarSpec today, so
        // exercise the verification helper directly against a url-shaped one.
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let bad = ChecksumSpec { algorithm: ChecksumAlgorithm::Sha256, value: "deadbeef".into() };
        let err = verify_checksum(&bytes, Some(&bad)).unwrap_err();
        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));

        let _ = UrlJarSpec { url: "unused".into(), checksum: None };
    }

    #[tokio::test]
    async fn container_jar_returns_pending_extraction_with_normalized_sidecar_mode() {
        let (fetcher, _dir) = fetcher();
        let jar = JarSpec {
            url: None,
            inline: None,
            container: Some(storm_types::ContainerJarSpec {
                image: "example/extract:latest".into(),
                path: "/opt/topology.jar".into(),
                extraction_mode: ExtractionMode::Sidecar,
                pull_secrets: vec![],
                checksum: None,
            }),
        };
        let outcome = fetcher.fetch("ns", "topo", "v1", &jar).await.unwrap();
        match outcome {
            FetchOutcome::PendingExtraction(req) => {
                assert_eq!(req.mode, ExtractionMode::InitContainer);
                assert!(req.restart_always);
            }
            other => panic!("expected PendingExtraction, got {other:?}"),
        }
    }
}
