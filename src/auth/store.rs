// Durable token storage
// One value, the bearer token, under a single well-known key

use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, SessionError};

/// Key the token is stored under
pub const TOKEN_KEY: &str = "token";

/// Storage for the persisted bearer token
pub trait TokenStore: Send + Sync {
    /// Read the stored token, `None` when nothing is stored
    fn load(&self) -> Result<Option<String>>;

    /// Replace the stored token
    fn save(&self, token: &str) -> Result<()>;

    /// Remove the stored token; removing an absent token is not an error
    fn clear(&self) -> Result<()>;
}

/// Token kept in a small JSON document on disk.
///
/// Writes go to a temporary sibling file which is synced and renamed over the
/// target, so a crash never leaves a half-written token behind.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> Result<PathBuf> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| {
                SessionError::Storage(format!("token path has no file name: {}", self.path.display()))
            })?
            .to_string_lossy();

        Ok(self.path.with_file_name(format!(".{}.tmp", file_name)))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            SessionError::Storage(format!("failed to read {}: {}", self.path.display(), e))
        })?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        let doc: Value = serde_json::from_str(&content).map_err(|e| {
            SessionError::Storage(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        Ok(doc
            .get(TOKEN_KEY)
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string))
    }

    fn save(&self, token: &str) -> Result<()> {
        let io_err = |action: &str, e: std::io::Error| {
            SessionError::Storage(format!("failed to {} {}: {}", action, self.path.display(), e))
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| io_err("create directory for", e))?;
            }
        }

        let body = serde_json::to_string_pretty(&json!({ TOKEN_KEY: token }))
            .map_err(|e| SessionError::Internal(e.into()))?;

        let tmp_path = self.temp_path()?;
        let mut tmp_file = File::create(&tmp_path).map_err(|e| io_err("write", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp_file
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| io_err("restrict permissions of", e))?;
        }

        tmp_file
            .write_all(body.as_bytes())
            .map_err(|e| io_err("write", e))?;
        tmp_file.sync_all().map_err(|e| io_err("sync", e))?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path).map_err(|e| io_err("replace", e))?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Storage(format!(
                "failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// Process-memory store, handy for tests and short-lived tools
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    /// Current stored value without going through the trait
    pub fn peek(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.peek())
    }

    fn save(&self, token: &str) -> Result<()> {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}
