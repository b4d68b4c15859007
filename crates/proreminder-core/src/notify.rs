use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::kv::write_json_atomic;
use crate::reminder::Entity;
use crate::store::CollectionKind;

/// Width of each collection's slot range. Primary slots live in
/// `[0, 2^30)`, extra slots in `[2^30, 2^31)`.
pub const SLOT_NAMESPACE_WIDTH: u32 = 1 << 30;

const SPOOL_FILE: &str = "notifications.json";

/// One pending local notification as handed to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i32,
    pub title: String,
    pub body: String,
    #[serde(with = "crate::datetime::iso_serde")]
    pub fire_at: DateTime<Utc>,
}

/// The platform's local-notification capability.
///
/// Scheduling twice under one id replaces the pending notification.
pub trait Notifier {
    fn request_permissions(&mut self) -> anyhow::Result<bool>;

    fn schedule(&mut self, notification: &Notification) -> anyhow::Result<()>;

    fn cancel(&mut self, id: i32) -> anyhow::Result<()>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn request_permissions(&mut self) -> anyhow::Result<bool> {
        (**self).request_permissions()
    }

    fn schedule(&mut self, notification: &Notification) -> anyhow::Result<()> {
        (**self).schedule(notification)
    }

    fn cancel(&mut self, id: i32) -> anyhow::Result<()> {
        (**self).cancel(id)
    }
}

/// Stable slot for an entity: a BLAKE3 digest of the collection key and the
/// entity id, folded into that collection's range.
///
/// Slots of different collections never meet. Two ids of one collection can
/// still fold onto the same slot; [`NotificationScheduler`] tracks slot owners
/// so such a pair warns instead of silently cancelling each other.
pub fn slot_for(kind: CollectionKind, entity_id: &str) -> i32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.key().as_bytes());
    hasher.update(&[0]);
    hasher.update(entity_id.as_bytes());
    let digest = hasher.finalize();

    let bytes = digest.as_bytes();
    let folded =
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & (SLOT_NAMESPACE_WIDTH - 1);
    let base = match kind {
        CollectionKind::Primary => 0,
        CollectionKind::Extra => SLOT_NAMESPACE_WIDTH,
    };

    // base + folded < 2^31
    (base + folded) as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { slot: i32 },
    NoAlarm,
    SkippedPast { slot: i32 },
}

/// Maps entities to zero-or-one notification each.
#[derive(Debug)]
pub struct NotificationScheduler<N: Notifier> {
    notifier: N,
    /// Entity id holding each slot scheduled by this process.
    owners: HashMap<i32, String>,
}

impl<N: Notifier> NotificationScheduler<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier,
            owners: HashMap::new(),
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    #[tracing::instrument(skip(self))]
    pub fn request_permissions(&mut self) -> anyhow::Result<bool> {
        let granted = self.notifier.request_permissions()?;
        if granted {
            info!("notification permission granted");
        } else {
            warn!("notification permission denied; alarms may not be delivered");
        }
        Ok(granted)
    }

    /// Schedules the entity's alarm if it lies strictly after `now`.
    #[tracing::instrument(skip(self, entity, now), fields(collection = %kind, id = entity.id()))]
    pub fn schedule<E: Entity>(
        &mut self,
        kind: CollectionKind,
        entity: &E,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ScheduleOutcome> {
        let Some(fire_at) = entity.alarm_at() else {
            return Ok(ScheduleOutcome::NoAlarm);
        };

        let slot = slot_for(kind, entity.id());
        if fire_at <= now {
            debug!(slot, %fire_at, "alarm is not in the future; skipping");
            return Ok(ScheduleOutcome::SkippedPast { slot });
        }

        let notification = Notification {
            id: slot,
            title: format!("{} {}", entity.symbol(), entity.title()),
            body: entity.description().unwrap_or_default().to_string(),
            fire_at,
        };
        self.notifier
            .schedule(&notification)
            .with_context(|| format!("failed to schedule notification {slot}"))?;

        match self.owners.insert(slot, entity.id().to_string()) {
            Some(previous) if previous != entity.id() => {
                warn!(slot, previous = %previous, "slot collision; replaced another reminder's notification");
            }
            _ => {}
        }
        debug!(slot, %fire_at, "scheduled notification");
        Ok(ScheduleOutcome::Scheduled { slot })
    }

    #[tracing::instrument(skip(self))]
    pub fn cancel(&mut self, slot: i32) -> anyhow::Result<()> {
        self.owners.remove(&slot);
        self.notifier
            .cancel(slot)
            .with_context(|| format!("failed to cancel notification {slot}"))
    }

    /// Cancels the entity's slot unless another entity has since taken it.
    pub fn cancel_entity<E: Entity>(&mut self, kind: CollectionKind, entity: &E) -> anyhow::Result<()> {
        if entity.alarm_at().is_none() {
            return Ok(());
        }

        let slot = slot_for(kind, entity.id());
        if let Some(owner) = self.owners.get(&slot).filter(|owner| owner.as_str() != entity.id()) {
            warn!(slot, owner = %owner, "slot now belongs to another reminder; not cancelling");
            return Ok(());
        }
        self.cancel(slot)
    }

    /// Brings the pending notification in line with an edited entity: a
    /// future alarm is (re)scheduled under the same slot, anything else
    /// cancels whatever the previous version left pending.
    pub fn reschedule<E: Entity>(
        &mut self,
        kind: CollectionKind,
        before: &E,
        after: &E,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ScheduleOutcome> {
        let outcome = self.schedule(kind, after, now)?;
        if !matches!(outcome, ScheduleOutcome::Scheduled { .. }) {
            self.cancel_entity(kind, before)?;
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierCall {
    Schedule(Notification),
    Cancel(i32),
}

/// Keeps every call in memory.
#[derive(Debug, Clone)]
pub struct RecordingNotifier {
    pub grant: bool,
    pub calls: Vec<NotifierCall>,
    pending: BTreeMap<i32, Notification>,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self {
            grant: true,
            calls: Vec::new(),
            pending: BTreeMap::new(),
        }
    }
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<&Notification> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                NotifierCall::Schedule(n) => Some(n),
                NotifierCall::Cancel(_) => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<i32> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                NotifierCall::Cancel(id) => Some(*id),
                NotifierCall::Schedule(_) => None,
            })
            .collect()
    }

    pub fn pending(&self) -> Vec<&Notification> {
        self.pending.values().collect()
    }
}

impl Notifier for RecordingNotifier {
    fn request_permissions(&mut self) -> anyhow::Result<bool> {
        Ok(self.grant)
    }

    fn schedule(&mut self, notification: &Notification) -> anyhow::Result<()> {
        self.calls.push(NotifierCall::Schedule(notification.clone()));
        self.pending.insert(notification.id, notification.clone());
        Ok(())
    }

    fn cancel(&mut self, id: i32) -> anyhow::Result<()> {
        self.calls.push(NotifierCall::Cancel(id));
        self.pending.remove(&id);
        Ok(())
    }
}

/// Accepts and drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotifier;

impl Notifier for DisabledNotifier {
    fn request_permissions(&mut self) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn schedule(&mut self, notification: &Notification) -> anyhow::Result<()> {
        debug!(slot = notification.id, "notifications disabled; dropping schedule");
        Ok(())
    }

    fn cancel(&mut self, id: i32) -> anyhow::Result<()> {
        debug!(slot = id, "notifications disabled; dropping cancel");
        Ok(())
    }
}

/// Pending notifications kept in `notifications.json` for an external launcher
/// to deliver.
#[derive(Debug)]
pub struct SpoolNotifier {
    path: PathBuf,
    pending: BTreeMap<i32, Notification>,
}

impl SpoolNotifier {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join(SPOOL_FILE);
        let pending = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            let rows: Vec<Notification> = if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed parsing {}", path.display()))?
            };
            rows.into_iter().map(|n| (n.id, n)).collect()
        } else {
            BTreeMap::new()
        };

        debug!(file = %path.display(), count = pending.len(), "opened notification spool");
        Ok(Self { path, pending })
    }

    /// Everything pending, earliest first.
    pub fn pending(&self) -> Vec<&Notification> {
        let mut rows: Vec<&Notification> = self.pending.values().collect();
        rows.sort_by_key(|n| (n.fire_at, n.id));
        rows
    }

    pub fn due(&self, now: DateTime<Utc>) -> Vec<&Notification> {
        self.pending()
            .into_iter()
            .filter(|n| n.fire_at <= now)
            .collect()
    }

    /// Removes and returns the due notifications.
    #[tracing::instrument(skip(self, now))]
    pub fn drain_due(&mut self, now: DateTime<Utc>) -> anyhow::Result<Vec<Notification>> {
        let due: Vec<Notification> = self.due(now).into_iter().cloned().collect();
        if due.is_empty() {
            return Ok(due);
        }
        for n in &due {
            self.pending.remove(&n.id);
        }
        self.flush()?;
        info!(count = due.len(), "drained due notifications");
        Ok(due)
    }

    fn flush(&self) -> anyhow::Result<()> {
        let rows: Vec<&Notification> = self.pending();
        let value = serde_json::to_value(rows)?;
        write_json_atomic(&self.path, &value)
            .with_context(|| format!("failed to save {}", self.path.display()))
    }
}

impl Notifier for SpoolNotifier {
    fn request_permissions(&mut self) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn schedule(&mut self, notification: &Notification) -> anyhow::Result<()> {
        self.pending.insert(notification.id, notification.clone());
        self.flush()
    }

    fn cancel(&mut self, id: i32) -> anyhow::Result<()> {
        if self.pending.remove(&id).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}
