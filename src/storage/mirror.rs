use crate::storage::{StorageError, StorageResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use url::Url;

/// File name a page is stored under inside its own directory
const INDEX_FILE: &str = "index.html";

/// Number of hex characters of the query hash kept in file names
const QUERY_HASH_LEN: usize = 12;

/// Writes response bodies under a mirror root directory
#[derive(Debug, Clone)]
pub struct MirrorWriter {
    root: PathBuf,
}

impl MirrorWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persists `body` at the mirror path of `url`, creating parent
    /// directories as needed, and returns the path written
    pub async fn write_body(&self, url: &Url, body: &[u8]) -> StorageResult<PathBuf> {
        let path = mirror_path(&self.root, url)
            .ok_or_else(|| StorageError::Unmappable(url.to_string()))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(&path, body)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(url = %url, path = %path.display(), bytes = body.len(), "Wrote body");
        Ok(path)
    }
}

/// Maps a URL to its file path under `root`
///
/// # Mapping Rules
///
/// - `<root>/<host>[_<port>]/<path segments>`
/// - A path whose last segment has a file extension (`/media/report.pdf`)
///   maps to that file
/// - Any other path (`/`, `/guidance/`, `/government/news`) maps to
///   `index.html` in a directory of its own. A page and the pages below it
///   (`/government` and `/government/news`) therefore never need the same
///   name as both a file and a directory.
/// - `.` and `..` segments are dropped, so nothing escapes `root`
/// - A query string inserts `.q<hash>` before the file extension, keeping
///   distinct query variants apart
///
/// Returns `None` for URLs without a host.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use url::Url;
/// use crawl_worker::storage::mirror_path;
///
/// let url = Url::parse("https://example.test/guidance/").unwrap();
/// let path = mirror_path(Path::new("/mirror"), &url).unwrap();
/// assert_eq!(path, Path::new("/mirror/example.test/guidance/index.html"));
/// ```
pub fn mirror_path(root: &Path, url: &Url) -> Option<PathBuf> {
    let host = url.host_str()?.to_lowercase();
    let host_dir = match url.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host,
    };

    let mut path = root.join(host_dir);

    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    let leaf_is_file = !url.path().ends_with('/')
        && segments
            .last()
            .is_some_and(|leaf| Path::new(leaf).extension().is_some());

    for segment in &segments {
        path.push(segment);
    }
    if !leaf_is_file {
        path.push(INDEX_FILE);
    }

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        let digest = hex::encode(Sha256::digest(query.as_bytes()));
        let tag = &digest[..QUERY_HASH_LEN];
        let stem = path.file_stem()?.to_string_lossy().into_owned();
        let file_name = match path.extension() {
            Some(ext) => format!("{}.q{}.{}", stem, tag, ext.to_string_lossy()),
            None => format!("{}.q{}", stem, tag),
        };
        path.set_file_name(file_name);
    }

    Some(path)
}
