use std::fmt;

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ReminderError;
use crate::filter::ViewFilter;
use crate::kv::KvStore;
use crate::reminder::{
    Entity, ExtraFilterPreferences, ExtraReminder, FilterPreferences, Reminder,
};

/// Which of the two independent collections an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionKind {
    Primary,
    Extra,
}

impl CollectionKind {
    pub fn key(self) -> &'static str {
        match self {
            CollectionKind::Primary => "reminders",
            CollectionKind::Extra => "extrareminders",
        }
    }

    pub fn filter_key(self) -> &'static str {
        match self {
            CollectionKind::Primary => "filters",
            CollectionKind::Extra => "extrafilters",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Type-level handle tying a collection to its item and filter record types.
pub trait Collection {
    type Item: Entity;
    type Filters: ViewFilter<Self::Item>
        + Default
        + Copy
        + fmt::Debug
        + Serialize
        + DeserializeOwned;

    const KIND: CollectionKind;
}

/// The prioritized reminder list.
#[derive(Debug, Clone, Copy)]
pub struct Primary;

/// The free-form "extra" list.
#[derive(Debug, Clone, Copy)]
pub struct Extra;

impl Collection for Primary {
    type Item = Reminder;
    type Filters = FilterPreferences;

    const KIND: CollectionKind = CollectionKind::Primary;
}

impl Collection for Extra {
    type Item = ExtraReminder;
    type Filters = ExtraFilterPreferences;

    const KIND: CollectionKind = CollectionKind::Extra;
}

/// Typed access to both collections and their filter records.
///
/// Every write replaces a whole collection. The handle starts closed; reads and
/// writes fail with [`ReminderError::StorageUnavailable`] until [`init`] runs
/// and again after [`close`].
///
/// [`init`]: EntityStore::init
/// [`close`]: EntityStore::close
#[derive(Debug)]
pub struct EntityStore<K: KvStore> {
    kv: K,
    open: bool,
}

impl<K: KvStore> EntityStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv, open: false }
    }

    #[tracing::instrument(skip(self))]
    pub fn init(&mut self) -> anyhow::Result<()> {
        self.open = true;
        info!("entity store initialized");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn close(&mut self) {
        self.open = false;
        info!("entity store closed");
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(ReminderError::StorageUnavailable.into())
        }
    }

    #[tracing::instrument(skip(self), fields(collection = %C::KIND))]
    pub fn load<C: Collection>(&self) -> anyhow::Result<Vec<C::Item>> {
        let Some(raw) = self.load_raw(C::KIND)? else {
            return Ok(Vec::new());
        };

        let items: Vec<C::Item> = serde_json::from_value(raw)
            .with_context(|| format!("failed decoding {}", C::KIND.key()))?;
        debug!(count = items.len(), "loaded collection");
        Ok(items)
    }

    /// The stored document exactly as persisted, `None` when never written.
    pub fn load_raw(&self, kind: CollectionKind) -> anyhow::Result<Option<Value>> {
        self.ensure_open()?;
        self.kv.get(kind.key())
    }

    #[tracing::instrument(skip(self, items), fields(collection = %C::KIND, count = items.len()))]
    pub fn replace<C: Collection>(&mut self, items: &[C::Item]) -> anyhow::Result<()> {
        self.ensure_open()?;
        let value = serde_json::to_value(items)
            .with_context(|| format!("failed encoding {}", C::KIND.key()))?;
        self.kv.set(C::KIND.key(), value)?;
        debug!("replaced collection");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(collection = %C::KIND))]
    pub fn load_filters<C: Collection>(&self) -> anyhow::Result<C::Filters> {
        self.ensure_open()?;
        match self.kv.get(C::KIND.filter_key())? {
            Some(raw) => serde_json::from_value(raw)
                .with_context(|| format!("failed decoding {}", C::KIND.filter_key())),
            None => Ok(C::Filters::default()),
        }
    }

    #[tracing::instrument(skip(self), fields(collection = %C::KIND))]
    pub fn save_filters<C: Collection>(&mut self, filters: &C::Filters) -> anyhow::Result<()> {
        self.ensure_open()?;
        let value = serde_json::to_value(filters)
            .with_context(|| format!("failed encoding {}", C::KIND.filter_key()))?;
        self.kv.set(C::KIND.filter_key(), value)
    }
}
