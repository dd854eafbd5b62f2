//! On-disk response cache.
//!
//! Caches the bodies of synchronous query and metadata responses so that
//! repeating a request does not hit the archive again. Entries live in
//! `~/.tap_cache/` by default, one `<key>.bin` body and one `<key>.json`
//! description per request.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{TapError, TapResult};
use crate::http::{HttpRequest, Method};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryInfo {
    url: String,
    params: Vec<(String, String)>,
    stored_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    /// Directory holding the cache entries (e.g., ~/.tap_cache)
    root_path: PathBuf,
}

impl ResponseCache {
    /// Cache in `~/.tap_cache`.
    pub fn new() -> TapResult<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| TapError::Config("HOME not set, cannot locate the cache".into()))?;
        Ok(Self {
            root_path: PathBuf::from(home).join(".tap_cache"),
        })
    }

    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Cache key: md5 of the method, URL and parameters in sorted order.
    ///
    /// Multipart requests carry local files and are never cached, so files
    /// do not take part in the key.
    pub fn key(request: &HttpRequest) -> String {
        let mut params = request.params.clone();
        params.sort();
        let method = match request.method {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        let mut text = format!("{method}|{}", request.url);
        for (k, v) in &params {
            text.push('|');
            text.push_str(k);
            text.push('=');
            text.push_str(v);
        }
        format!("{:x}", md5::compute(text.as_bytes()))
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.root_path.join(format!("{key}.bin"))
    }

    fn info_path(&self, key: &str) -> PathBuf {
        self.root_path.join(format!("{key}.json"))
    }

    /// Cached body for this request, if any.
    ///
    /// An unreadable entry counts as a miss.
    pub fn get(&self, request: &HttpRequest) -> Option<Vec<u8>> {
        let key = Self::key(request);
        let path = self.body_path(&key);
        if !path.exists() {
            return None;
        }
        match std::fs::read(&path) {
            Ok(body) => {
                debug!(url = %request.url, key, "cache hit");
                Some(body)
            }
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {e}", path.display());
                None
            }
        }
    }

    pub fn put(&self, request: &HttpRequest, body: &[u8]) -> TapResult<PathBuf> {
        std::fs::create_dir_all(&self.root_path)?;
        let key = Self::key(request);
        let info = EntryInfo {
            url: request.url.clone(),
            params: request.params.clone(),
            stored_at: chrono::Utc::now(),
        };
        let info_json =
            serde_json::to_string_pretty(&info).map_err(|e| TapError::Config(e.to_string()))?;
        std::fs::write(self.info_path(&key), info_json)?;

        let path = self.body_path(&key);
        std::fs::write(&path, body)?;
        debug!(url = %request.url, key, bytes = body.len(), "cached response");
        Ok(path)
    }

    /// Number of cached responses.
    pub fn len(&self) -> TapResult<usize> {
        if !self.root_path.exists() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in std::fs::read_dir(&self.root_path)? {
            if entry?.path().extension().and_then(|e| e.to_str()) == Some("bin") {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> TapResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete every entry. Returns how many responses were removed.
    pub fn clear(&self) -> TapResult<usize> {
        if !self.root_path.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root_path)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("bin") => {
                    std::fs::remove_file(&path)?;
                    removed += 1;
                }
                Some("json") => std::fs::remove_file(&path)?,
                _ => {}
            }
        }
        Ok(removed)
    }
}
