//! Persistent session-id storage.
//!
//! The agent remembers the last session id per channel so a later
//! `connect` with `check_last_session` can resume it. The store never
//! holds credentials or secrets: one plain-text line per channel,
//! `<channelId>-session.txt` under the user's home directory.

use std::fs;
use std::path::{Path, PathBuf};

/// Pluggable session-id persistence keyed by channel.
pub trait SessionStore: Send + Sync {
    /// Loads the last session id persisted for `key`, if any.
    fn load(&self, key: &str) -> Option<String>;

    /// Persists `session_id` for `key`, replacing any previous value.
    fn save(&self, key: &str, session_id: &str) -> std::io::Result<()>;

    /// Removes the persisted session id for `key`, if present.
    fn clear(&self, key: &str) -> std::io::Result<()>;
}

/// File-backed store: one single-line file per channel.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Creates a store rooted at the given directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Creates a store rooted at the user's home directory, the
    /// default location.
    pub fn in_home_dir() -> Self {
        Self::new(dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}-session.txt", sanitize_key(key)))
    }
}

/// Keeps channel identifiers filesystem-safe.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl SessionStore for FileSessionStore {
    fn load(&self, key: &str) -> Option<String> {
        let contents = fs::read_to_string(self.path_for(key)).ok()?;
        let session_id = contents.lines().next()?.trim();
        if session_id.is_empty() {
            None
        } else {
            Some(session_id.to_string())
        }
    }

    fn save(&self, key: &str, session_id: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), format!("{}\n", session_id))
    }

    fn clear(&self, key: &str) -> std::io::Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
