use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ReminderError;
use crate::reminder::{ExtraReminder, Reminder};
use crate::store::CollectionKind;

pub const PRIMARY_FILE: &str = "reminders.json";
pub const EXTRA_FILE: &str = "extrareminders.json";

/// Both backing collections exactly as stored. Filter records are not part of
/// a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub reminders: Value,
    #[serde(rename = "extraReminders")]
    pub extra_reminders: Value,
}

/// A named JSON document moving in or out of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFile {
    pub name: String,
    pub contents: String,
}

impl TransferFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("import path has no file name: {}", path.display()))?
            .to_string();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self { name, contents })
    }
}

impl ExportBundle {
    /// Always both files, even when a collection is empty.
    pub fn files(&self) -> anyhow::Result<Vec<TransferFile>> {
        Ok(vec![
            TransferFile::new(PRIMARY_FILE, serde_json::to_string_pretty(&self.reminders)?),
            TransferFile::new(EXTRA_FILE, serde_json::to_string_pretty(&self.extra_reminders)?),
        ])
    }

    #[tracing::instrument(skip(self, dir))]
    pub fn write_to_dir(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let mut written = Vec::new();
        for file in self.files()? {
            let path = dir.join(&file.name);
            fs::write(&path, format!("{}\n", file.contents))
                .with_context(|| format!("failed writing {}", path.display()))?;
            written.push(path);
        }

        info!(dir = %dir.display(), files = written.len(), "export written");
        Ok(written)
    }
}

/// Picks the target collection from a file name. `extra` wins over
/// `reminders`; names matching neither are not routed.
pub fn route(name: &str) -> Option<CollectionKind> {
    let lower = name.to_lowercase();
    if lower.contains("extra") {
        Some(CollectionKind::Extra)
    } else if lower.contains("reminders") {
        Some(CollectionKind::Primary)
    } else {
        None
    }
}

/// Fully decoded import batch, ready to replace collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportBatch {
    pub reminders: Option<Vec<Reminder>>,
    pub extra_reminders: Option<Vec<ExtraReminder>>,
    pub ignored: Vec<String>,
}

/// Decodes every file before anything is applied. The first malformed routed
/// file fails the whole batch with [`ReminderError::ImportMalformed`].
#[tracing::instrument(skip(files), fields(files = files.len()))]
pub fn decode_batch(files: &[TransferFile]) -> anyhow::Result<ImportBatch> {
    let mut batch = ImportBatch::default();

    for file in files {
        let Some(kind) = route(&file.name) else {
            warn!(file = %file.name, "file name matches no collection; ignoring");
            batch.ignored.push(file.name.clone());
            continue;
        };

        match kind {
            CollectionKind::Primary => {
                let items: Vec<Reminder> = decode_file(file)?;
                if batch.reminders.replace(items).is_some() {
                    warn!(file = %file.name, "several files target reminders; keeping the last");
                }
            }
            CollectionKind::Extra => {
                let items: Vec<ExtraReminder> = decode_file(file)?;
                if batch.extra_reminders.replace(items).is_some() {
                    warn!(file = %file.name, "several files target extra reminders; keeping the last");
                }
            }
        }
        debug!(file = %file.name, collection = %kind, "decoded import file");
    }

    Ok(batch)
}

fn decode_file<T: serde::de::DeserializeOwned>(file: &TransferFile) -> anyhow::Result<Vec<T>> {
    let value: Value = serde_json::from_str(file.contents.trim())
        .map_err(|err| ReminderError::import_malformed(&file.name, err))?;
    if !value.is_array() {
        return Err(ReminderError::import_malformed(&file.name, "expected a JSON array").into());
    }
    serde_json::from_value(value).map_err(|err| ReminderError::import_malformed(&file.name, err).into())
}
