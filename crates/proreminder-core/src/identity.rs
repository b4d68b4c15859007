use std::cell::Cell;
use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::reminder::Entity;

const ID_PREFIX: &str = "reminder";
const SUFFIX_LEN: usize = 9;

/// Issues `reminder_<millis>_<suffix>` identifiers.
///
/// The millisecond component never repeats or moves backwards for one
/// generator, even when the wall clock does; the suffix comes from a v4 UUID.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last_millis: Cell<i64>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let wall = Utc::now().timestamp_millis();
        let millis = wall.max(self.last_millis.get() + 1);
        self.last_millis.set(millis);

        let random = Uuid::new_v4().simple().to_string();
        format!("{ID_PREFIX}_{millis}_{}", &random[..SUFFIX_LEN])
    }
}

/// Gives every entity without an id a fresh one. Returns how many were assigned.
///
/// Order and every other field are left untouched; running it again on the
/// result assigns nothing.
#[tracing::instrument(skip(items, ids), fields(count = items.len()))]
pub fn migrate_ids<E: Entity>(items: &mut [E], ids: &IdGenerator) -> usize {
    let mut assigned = 0;
    for item in items.iter_mut().filter(|item| !item.has_id()) {
        item.set_id(ids.next_id());
        assigned += 1;
    }

    if assigned > 0 {
        debug!(assigned, "assigned ids to legacy entities");
    }
    assigned
}

/// Gives a fresh id to every entity whose id already appeared earlier in the
/// sequence. Only imported data can contain such repeats.
pub fn reassign_duplicate_ids<E: Entity>(items: &mut [E], ids: &IdGenerator) -> usize {
    let mut seen = HashSet::new();
    let mut reassigned = 0;
    for item in items.iter_mut() {
        if !item.has_id() {
            continue;
        }
        if !seen.insert(item.id().to_string()) {
            let fresh = ids.next_id();
            warn!(duplicate = item.id(), fresh = %fresh, "duplicate id; reassigning");
            item.set_id(fresh);
            reassigned += 1;
        }
    }
    reassigned
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::{IdGenerator, migrate_ids, reassign_duplicate_ids};
    use crate::reminder::{Entity, Reminder, ReminderDraft};

    fn legacy(title: &str) -> Reminder {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 16, 5, 0, 0)
            .single()
            .expect("valid now");
        Reminder::from_draft(String::new(), ReminderDraft::new(title, "🟢"), now)
    }

    #[test]
    fn ids_are_distinct_even_within_one_millisecond() {
        let ids = IdGenerator::new();
        let issued: BTreeSet<String> = (0..500).map(|_| ids.next_id()).collect();
        assert_eq!(issued.len(), 500);
        assert!(issued.iter().all(|id| id.starts_with("reminder_")));
    }

    #[test]
    fn migration_is_idempotent_and_keeps_existing_ids() {
        let ids = IdGenerator::new();
        let mut items = vec![legacy("a"), legacy("b"), legacy("c")];
        items[1].set_id("kept".to_string());

        assert_eq!(migrate_ids(&mut items, &ids), 2);
        let first_pass: Vec<String> = items.iter().map(|r| r.id.clone()).collect();
        assert_eq!(first_pass[1], "kept");

        assert_eq!(migrate_ids(&mut items, &ids), 0);
        let second_pass: Vec<String> = items.iter().map(|r| r.id.clone()).collect();
        assert_eq!(first_pass, second_pass);

        let titles: Vec<&str> = items.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicates_after_the_first_occurrence_get_fresh_ids() {
        let ids = IdGenerator::new();
        let mut items = vec![legacy("a"), legacy("b"), legacy("c")];
        for item in &mut items {
            item.set_id("same".to_string());
        }

        assert_eq!(reassign_duplicate_ids(&mut items, &ids), 2);
        assert_eq!(items[0].id, "same");
        let distinct: BTreeSet<&str> = items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(distinct.len(), 3);
    }
}
