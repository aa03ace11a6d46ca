use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// One entry of the SSO token cache as written by `aws sso login`.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: String,
}

impl CachedToken {
    /// Some writers emit `2024-01-01T00:00:00UTC`; swap the marker for `Z`
    /// before reading it as RFC 3339.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let normalized = self.expires_at.replace("UTC", "Z");
        DateTime::parse_from_rfc3339(&normalized)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        matches!(self.expires_at(), Some(expires_at) if expires_at > now)
    }
}

#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the access token of the first usable cache entry, taking file
    /// names in ascending order. Entries that cannot be read or parsed are
    /// skipped.
    pub fn find_valid_token(&self, now: DateTime<Utc>) -> Option<String> {
        for path in self.entries() {
            let token = match Self::load(&path) {
                Ok(token) => token,
                Err(err) => {
                    tracing::debug!(path = %path.display(), "skipping cache entry: {err}");
                    continue;
                }
            };
            if token.is_valid_at(now) {
                tracing::debug!(path = %path.display(), "using cached SSO access token");
                return Some(token.access_token);
            }
            tracing::trace!(path = %path.display(), expires_at = %token.expires_at, "cache entry expired");
        }
        None
    }

    fn entries(&self) -> Vec<PathBuf> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) => {
                tracing::debug!(dir = %self.dir.display(), "SSO cache unavailable: {err}");
                return Vec::new();
            }
        };
        let mut paths: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        paths
    }

    fn load(path: &Path) -> Result<CachedToken, Box<dyn std::error::Error>> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
