use crate::reminder::{
    ExtraFilterPreferences, ExtraReminder, FilterPreferences, Priority, Reminder,
};

/// Visibility and ordering preferences for one collection's view.
pub trait ViewFilter<E> {
    fn admits(&self, item: &E) -> bool;

    /// `true` when the visible subset may be manually reordered.
    fn custom_order(&self) -> bool;
}

impl ViewFilter<Reminder> for FilterPreferences {
    fn admits(&self, item: &Reminder) -> bool {
        match item.priority {
            Priority::High => self.show_high,
            Priority::Medium => self.show_medium,
            Priority::Low => self.show_low,
            Priority::Unrecognized(_) => false,
        }
    }

    fn custom_order(&self) -> bool {
        self.custom_order
    }
}

impl ViewFilter<ExtraReminder> for ExtraFilterPreferences {
    fn admits(&self, _item: &ExtraReminder) -> bool {
        true
    }

    fn custom_order(&self) -> bool {
        self.custom_order
    }
}

/// The visible subset of `items`, in backing order.
#[tracing::instrument(skip_all, fields(count = items.len()))]
pub fn project<E, F>(items: &[E], filter: &F) -> Vec<E>
where
    E: Clone,
    F: ViewFilter<E>,
{
    items
        .iter()
        .filter(|item| filter.admits(item))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ViewFilter, project};
    use crate::reminder::{
        Entity, ExtraFilterPreferences, ExtraReminder, FilterPreferences, Reminder, ReminderDraft,
    };

    fn reminder(id: &str, symbol: &str) -> Reminder {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 16, 5, 0, 0)
            .single()
            .expect("valid now");
        Reminder::from_draft(id.to_string(), ReminderDraft::new(id, symbol), now)
    }

    fn ids(items: &[Reminder]) -> Vec<&str> {
        items.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn hides_buckets_whose_flag_is_off() {
        let backing = vec![
            reminder("h1", "🔴"),
            reminder("m1", "🟡"),
            reminder("l1", "🟢"),
            reminder("h2", "🔴"),
        ];
        let prefs = FilterPreferences {
            show_high: false,
            ..FilterPreferences::default()
        };

        let visible = project(&backing, &prefs);
        assert_eq!(ids(&visible), vec!["m1", "l1"]);
        assert_eq!(backing.len(), 4);
    }

    #[test]
    fn unrecognized_bucket_is_never_visible() {
        let backing = vec![reminder("odd", "⭐"), reminder("h1", "🔴")];
        let everything = FilterPreferences::default();
        assert_eq!(ids(&project(&backing, &everything)), vec!["h1"]);
    }

    #[test]
    fn projection_is_pure_and_repeatable() {
        let backing = vec![
            reminder("a", "🟢"),
            reminder("b", "🔴"),
            reminder("c", "🟡"),
        ];
        let snapshot = backing.clone();
        let prefs = FilterPreferences {
            show_medium: false,
            ..FilterPreferences::default()
        };

        let first = project(&backing, &prefs);
        let second = project(&backing, &prefs);
        assert_eq!(first, second);
        assert_eq!(backing, snapshot);
    }

    #[test]
    fn extra_collection_projection_is_identity() {
        let now = Utc::now();
        let backing = vec![
            ExtraReminder::from_draft("x".to_string(), ReminderDraft::new("x", "🎉"), now),
            ExtraReminder::from_draft("y".to_string(), ReminderDraft::new("y", "📚"), now),
        ];
        let prefs = ExtraFilterPreferences::default();
        assert!(!prefs.custom_order());
        assert_eq!(project(&backing, &prefs), backing);
    }
}
