use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::filter::{ViewFilter, project};
use crate::identity::{IdGenerator, migrate_ids, reassign_duplicate_ids};
use crate::kv::KvStore;
use crate::notify::{NotificationScheduler, Notifier, ScheduleOutcome};
use crate::reminder::{Entity, ReminderDraft};
use crate::reorder::{ReorderOutcome, resolve_reorder};
use crate::store::{Collection, CollectionKind, EntityStore, Extra, Primary};
use crate::transfer::{ExportBundle, TransferFile, decode_batch};

/// Result of a mutating operation that may decline to change anything.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    /// Nothing was written; carries the reason.
    Rejected(&'static str),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub permission_granted: bool,
    pub migrated: usize,
    pub scheduled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub replaced: Vec<CollectionKind>,
    pub ignored: Vec<String>,
    pub migrated: usize,
    pub scheduled: usize,
}

/// Every reminder operation, run to completion against one store handle.
///
/// Each mutation loads the latest snapshot, computes the new full collection,
/// replaces it in one write and then brings notifications in line, all before
/// returning.
#[derive(Debug)]
pub struct ReminderEngine<K: KvStore, N: Notifier> {
    store: EntityStore<K>,
    scheduler: NotificationScheduler<N>,
    ids: IdGenerator,
}

impl<K: KvStore, N: Notifier> ReminderEngine<K, N> {
    pub fn new(kv: K, notifier: N) -> Self {
        Self {
            store: EntityStore::new(kv),
            scheduler: NotificationScheduler::new(notifier),
            ids: IdGenerator::new(),
        }
    }

    pub fn store(&self) -> &EntityStore<K> {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        self.scheduler.notifier()
    }

    /// Opens the store, migrates legacy ids in both collections, asks for
    /// notification permission and schedules every future alarm.
    #[instrument(skip(self, now))]
    pub fn init(&mut self, now: DateTime<Utc>) -> anyhow::Result<StartupReport> {
        self.store.init()?;

        let mut report = StartupReport {
            permission_granted: self.scheduler.request_permissions()?,
            ..StartupReport::default()
        };

        let (migrated, scheduled) = self.startup_collection::<Primary>(now)?;
        report.migrated += migrated;
        report.scheduled += scheduled;

        let (migrated, scheduled) = self.startup_collection::<Extra>(now)?;
        report.migrated += migrated;
        report.scheduled += scheduled;

        info!(
            migrated = report.migrated,
            scheduled = report.scheduled,
            "engine initialized"
        );
        Ok(report)
    }

    fn startup_collection<C: Collection>(
        &mut self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(usize, usize)> {
        let mut items = self.store.load::<C>()?;
        let migrated = migrate_ids(&mut items, &self.ids);
        if migrated > 0 {
            self.store
                .replace::<C>(&items)
                .with_context(|| format!("failed to persist migrated {}", C::KIND))?;
        }

        let scheduled = self.schedule_all::<C>(&items, now)?;
        Ok((migrated, scheduled))
    }

    fn schedule_all<C: Collection>(
        &mut self,
        items: &[C::Item],
        now: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let mut scheduled = 0;
        for item in items {
            if let ScheduleOutcome::Scheduled { .. } = self.scheduler.schedule(C::KIND, item, now)? {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    #[instrument(skip(self))]
    pub fn close(&mut self) {
        self.store.close();
    }

    /// The full backing collection.
    pub fn load<C: Collection>(&self) -> anyhow::Result<Vec<C::Item>> {
        self.store.load::<C>()
    }

    pub fn filters<C: Collection>(&self) -> anyhow::Result<C::Filters> {
        self.store.load_filters::<C>()
    }

    #[instrument(skip(self), fields(collection = %C::KIND))]
    pub fn set_filters<C: Collection>(&mut self, filters: C::Filters) -> anyhow::Result<()> {
        self.store.save_filters::<C>(&filters)
    }

    /// The visible subset under the stored filter preferences.
    pub fn view<C: Collection>(&self) -> anyhow::Result<Vec<C::Item>> {
        let items = self.store.load::<C>()?;
        let filters = self.store.load_filters::<C>()?;
        Ok(project(&items, &filters))
    }

    #[instrument(skip(self, draft, now), fields(collection = %C::KIND))]
    pub fn add<C: Collection>(
        &mut self,
        draft: ReminderDraft,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Outcome<C::Item>> {
        if !C::Item::accepts(&draft) {
            debug!("draft rejected before any write");
            return Ok(Outcome::Rejected("a title and a priority or icon are required"));
        }

        let mut items = self.store.load::<C>()?;
        let item = C::Item::from_draft(self.ids.next_id(), draft, now);
        items.push(item.clone());
        self.store.replace::<C>(&items)?;

        self.scheduler.schedule(C::KIND, &item, now)?;
        info!(id = item.id(), "reminder added");
        Ok(Outcome::Applied(item))
    }

    #[instrument(skip(self, draft, now), fields(collection = %C::KIND))]
    pub fn edit<C: Collection>(
        &mut self,
        id: &str,
        draft: ReminderDraft,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Outcome<C::Item>> {
        if !C::Item::accepts(&draft) {
            debug!("draft rejected before any write");
            return Ok(Outcome::Rejected("a title and a priority or icon are required"));
        }

        let mut items = self.store.load::<C>()?;
        let Some(slot) = items.iter_mut().find(|item| item.id() == id) else {
            return Ok(Outcome::Rejected("no reminder with that id"));
        };

        let before = slot.clone();
        slot.apply_draft(draft);
        let after = slot.clone();
        self.store.replace::<C>(&items)?;

        self.scheduler.reschedule(C::KIND, &before, &after, now)?;
        info!(id, "reminder edited");
        Ok(Outcome::Applied(after))
    }

    #[instrument(skip(self), fields(collection = %C::KIND))]
    pub fn delete<C: Collection>(&mut self, id: &str) -> anyhow::Result<Outcome<C::Item>> {
        let mut items = self.store.load::<C>()?;
        let Some(index) = items.iter().position(|item| item.id() == id) else {
            return Ok(Outcome::Rejected("no reminder with that id"));
        };

        let removed = items.remove(index);
        self.store.replace::<C>(&items)?;

        self.scheduler.cancel_entity(C::KIND, &removed)?;
        info!(id, "reminder deleted");
        Ok(Outcome::Applied(removed))
    }

    /// Moves an item within the visible list. `from` and `to` are positions in
    /// the projection; the backing collection is written in the same call.
    #[instrument(skip(self), fields(collection = %C::KIND))]
    pub fn reorder<C: Collection>(
        &mut self,
        from: usize,
        to: usize,
    ) -> anyhow::Result<Outcome<Vec<C::Item>>> {
        let filters = self.store.load_filters::<C>()?;
        if !filters.custom_order() {
            return Ok(Outcome::Rejected("custom order is turned off"));
        }

        let items = self.store.load::<C>()?;
        let projected = project(&items, &filters);
        match resolve_reorder(&items, &projected, from, to) {
            ReorderOutcome::Applied(next) => {
                self.store.replace::<C>(&next)?;
                Ok(Outcome::Applied(next))
            }
            ReorderOutcome::Unchanged(reason) => Ok(Outcome::Rejected(reason)),
        }
    }

    /// Both backing collections verbatim; a never-written collection exports
    /// as an empty array.
    #[instrument(skip(self))]
    pub fn export(&self) -> anyhow::Result<ExportBundle> {
        let dump = |kind: CollectionKind| -> anyhow::Result<Value> {
            Ok(self
                .store
                .load_raw(kind)?
                .unwrap_or_else(|| Value::Array(Vec::new())))
        };

        Ok(ExportBundle {
            reminders: dump(CollectionKind::Primary)?,
            extra_reminders: dump(CollectionKind::Extra)?,
        })
    }

    /// Replaces every collection named by the batch. Nothing is written unless
    /// every routed file decodes.
    #[instrument(skip(self, files, now), fields(files = files.len()))]
    pub fn import(
        &mut self,
        files: &[TransferFile],
        now: DateTime<Utc>,
    ) -> anyhow::Result<ImportReport> {
        let batch = decode_batch(files)?;
        let mut report = ImportReport {
            ignored: batch.ignored,
            ..ImportReport::default()
        };

        if let Some(items) = batch.reminders {
            self.replace_imported::<Primary>(items, now, &mut report)?;
        }
        if let Some(items) = batch.extra_reminders {
            self.replace_imported::<Extra>(items, now, &mut report)?;
        }

        info!(
            replaced = report.replaced.len(),
            ignored = report.ignored.len(),
            "import finished"
        );
        Ok(report)
    }

    fn replace_imported<C: Collection>(
        &mut self,
        mut items: Vec<C::Item>,
        now: DateTime<Utc>,
        report: &mut ImportReport,
    ) -> anyhow::Result<()> {
        let previous = self.store.load::<C>()?;

        report.migrated += migrate_ids(&mut items, &self.ids);
        reassign_duplicate_ids(&mut items, &self.ids);
        self.store.replace::<C>(&items)?;

        for item in &previous {
            self.scheduler.cancel_entity(C::KIND, item)?;
        }
        report.scheduled += self.schedule_all::<C>(&items, now)?;
        report.replaced.push(C::KIND);
        Ok(())
    }
}
