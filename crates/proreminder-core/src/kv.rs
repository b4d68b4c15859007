use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// The key-value persistence capability the entity store is built on.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()>;
}

/// One pretty-printed `<key>.json` document per key under a data directory.
#[derive(Debug)]
pub struct FileKvStore {
    pub data_dir: PathBuf,
}

impl FileKvStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened key-value store");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl KvStore for FileKvStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(file = %path.display(), "key not present");
            return Ok(None);
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let value = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", path.display()))?;
        Ok(Some(value))
    }

    #[tracing::instrument(skip(self, value))]
    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let path = self.path_for(key);
        write_json_atomic(&path, &value).with_context(|| format!("failed to save {key}"))
    }
}

/// Writes through a temp file in the destination directory and renames it over
/// the target, so readers never observe a half-written document.
pub(crate) fn write_json_atomic(path: &Path, value: &Value) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving json atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: BTreeMap<String, Value>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}
