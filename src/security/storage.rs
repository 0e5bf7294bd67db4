use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// String key/value storage backing credentials and session state.
///
/// Writes never fail from the caller's point of view: a backend that cannot
/// persist logs the problem and keeps serving its in-memory view.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

fn lock(map: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    match map.lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

/// Process-lifetime storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        lock(&self.entries).insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        lock(&self.entries).remove(key);
    }
}

/// JSON-file storage that survives process restarts.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), keys = entries.len(), "opened credential file");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) {
        if let Err(err) = self.write_atomically(entries) {
            warn!(path = %self.path.display(), error = %err, "failed to persist storage");
        }
    }

    fn write_atomically(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(entries).context("serializing storage")?;
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("creating storage directory")?;
        }
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp).context("creating temp file")?;
        // A leftover temp file keeps its old mode, so tighten it explicitly.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .context("restricting temp file permissions")?;
        }
        file.write_all(&raw).context("writing temp file")?;
        file.sync_all().context("flushing temp file")?;
        drop(file);
        fs::rename(&tmp, &self.path).context("replacing storage file")?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }
}
