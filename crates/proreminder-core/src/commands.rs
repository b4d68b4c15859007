use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::{Command, Toggle};
use crate::datetime::parse_date_expr;
use crate::engine::{Outcome, ReminderEngine};
use crate::filter::ViewFilter;
use crate::kv::KvStore;
use crate::notify::{Notifier, SpoolNotifier};
use crate::reminder::{Entity, Priority, ReminderDraft};
use crate::render::Renderer;
use crate::store::{Collection, Extra, Primary};
use crate::transfer::TransferFile;

/// Field changes requested by `edit`; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
struct EditChanges {
    title: Option<String>,
    description: Option<String>,
    clear_description: bool,
    symbol: Option<String>,
    alarm_at: Option<DateTime<Utc>>,
    clear_alarm: bool,
}

#[instrument(skip(engine, renderer, data_dir, command, now))]
pub fn dispatch<K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    renderer: &Renderer,
    data_dir: &Path,
    command: Command,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add {
            target,
            title,
            description,
            priority,
            icon,
            alarm,
        } => {
            let symbol = resolve_symbol(target.extra, priority.as_deref(), icon.as_deref())?;
            let mut draft = ReminderDraft::new(title, symbol.unwrap_or_default());
            draft.description = description;
            draft.alarm_at = alarm.map(|raw| parse_date_expr(&raw, now)).transpose()?;

            if target.extra {
                cmd_add::<Extra, _, _>(engine, draft, now)
            } else {
                cmd_add::<Primary, _, _>(engine, draft, now)
            }
        }
        Command::Edit {
            target,
            id,
            title,
            description,
            clear_desc,
            priority,
            icon,
            alarm,
            clear_alarm,
        } => {
            let changes = EditChanges {
                title,
                description,
                clear_description: clear_desc,
                symbol: resolve_symbol(target.extra, priority.as_deref(), icon.as_deref())?,
                alarm_at: alarm.map(|raw| parse_date_expr(&raw, now)).transpose()?,
                clear_alarm,
            };

            if target.extra {
                cmd_edit::<Extra, _, _>(engine, &id, changes, now)
            } else {
                cmd_edit::<Primary, _, _>(engine, &id, changes, now)
            }
        }
        Command::Delete { target, id } => {
            if target.extra {
                cmd_delete::<Extra, _, _>(engine, &id)
            } else {
                cmd_delete::<Primary, _, _>(engine, &id)
            }
        }
        Command::List { target, all } => {
            if target.extra {
                cmd_list::<Extra, _, _>(engine, renderer, all, now)
            } else {
                cmd_list::<Primary, _, _>(engine, renderer, all, now)
            }
        }
        Command::Move { target, from, to } => {
            let from = from
                .checked_sub(1)
                .ok_or_else(|| anyhow!("positions start at 1"))?;
            let to = to
                .checked_sub(1)
                .ok_or_else(|| anyhow!("positions start at 1"))?;

            if target.extra {
                cmd_move::<Extra, _, _>(engine, from, to)
            } else {
                cmd_move::<Primary, _, _>(engine, from, to)
            }
        }
        Command::Filter {
            target,
            high,
            medium,
            low,
            custom,
        } => {
            if target.extra {
                if high.is_some() || medium.is_some() || low.is_some() {
                    bail!("the extra list has no priority filters; only --custom applies");
                }
                cmd_filter_extra(engine, renderer, custom)
            } else {
                cmd_filter(engine, renderer, [high, medium, low, custom])
            }
        }
        Command::Export { dir } => cmd_export(engine, &dir),
        Command::Import { files } => cmd_import(engine, &files, now),
        Command::Notifications { due, drain } => {
            cmd_notifications(renderer, data_dir, due, drain, now)
        }
    }
}

fn cmd_add<C: Collection, K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    draft: ReminderDraft,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(collection = %C::KIND, "command add");

    match engine.add::<C>(draft, now)? {
        Outcome::Applied(item) => {
            println!("Created reminder {}.", item.id());
            Ok(())
        }
        Outcome::Rejected(reason) => Err(anyhow!("reminder not created: {reason}")),
    }
}

fn cmd_edit<C: Collection, K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    id: &str,
    changes: EditChanges,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(collection = %C::KIND, id, "command edit");

    let items = engine.load::<C>()?;
    let current = items
        .iter()
        .find(|item| item.id() == id)
        .ok_or_else(|| anyhow!("no reminder with id {id}"))?;
    let draft = edited_draft(current, changes);

    match engine.edit::<C>(id, draft, now)? {
        Outcome::Applied(_) => {
            println!("Modified reminder {id}.");
            Ok(())
        }
        Outcome::Rejected(reason) => Err(anyhow!("reminder not modified: {reason}")),
    }
}

fn cmd_delete<C: Collection, K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    id: &str,
) -> anyhow::Result<()> {
    info!(collection = %C::KIND, id, "command delete");

    match engine.delete::<C>(id)? {
        Outcome::Applied(item) => {
            println!("Deleted reminder {} '{}'.", item.id(), item.title());
            Ok(())
        }
        Outcome::Rejected(reason) => Err(anyhow!("reminder not deleted: {reason}")),
    }
}

fn cmd_list<C: Collection, K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    renderer: &Renderer,
    all: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(collection = %C::KIND, all, "command list");

    let filters = engine.filters::<C>()?;
    let rows = numbered(engine.load::<C>()?, &filters, all);

    if rows.is_empty() {
        println!("No reminders.");
        return Ok(());
    }
    renderer.print_reminder_table(&rows, now)
}

/// Pairs each row with its 1-based position in the visible view. Hidden rows
/// are kept only when `all` is set and carry no position, so the numbers shown
/// always match what `move` accepts.
fn numbered<E, F: ViewFilter<E>>(items: Vec<E>, filters: &F, all: bool) -> Vec<(Option<usize>, E)> {
    let mut visible = 0;
    items
        .into_iter()
        .filter_map(|item| {
            if filters.admits(&item) {
                visible += 1;
                Some((Some(visible), item))
            } else if all {
                Some((None, item))
            } else {
                None
            }
        })
        .collect()
}

fn cmd_move<C: Collection, K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    from: usize,
    to: usize,
) -> anyhow::Result<()> {
    info!(collection = %C::KIND, from, to, "command move");

    match engine.reorder::<C>(from, to)? {
        Outcome::Applied(_) => {
            println!("Moved reminder {} to position {}.", from + 1, to + 1);
            Ok(())
        }
        Outcome::Rejected(reason) => Err(anyhow!("nothing moved: {reason}")),
    }
}

fn cmd_filter<K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    renderer: &Renderer,
    [high, medium, low, custom]: [Option<Toggle>; 4],
) -> anyhow::Result<()> {
    info!("command filter");

    let mut filters = engine.filters::<Primary>()?;
    let before = filters;
    if let Some(Toggle(on)) = high {
        filters.show_high = on;
    }
    if let Some(Toggle(on)) = medium {
        filters.show_medium = on;
    }
    if let Some(Toggle(on)) = low {
        filters.show_low = on;
    }
    if let Some(Toggle(on)) = custom {
        filters.custom_order = on;
    }

    if filters != before {
        engine.set_filters::<Primary>(filters)?;
    }
    renderer.print_filters(&filters)
}

fn cmd_filter_extra<K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    renderer: &Renderer,
    custom: Option<Toggle>,
) -> anyhow::Result<()> {
    info!("command filter --extra");

    let mut filters = engine.filters::<Extra>()?;
    if let Some(Toggle(on)) = custom
        && filters.custom_order != on
    {
        filters.custom_order = on;
        engine.set_filters::<Extra>(filters)?;
    }
    renderer.print_filters(&filters)
}

fn cmd_export<K: KvStore, N: Notifier>(
    engine: &ReminderEngine<K, N>,
    dir: &Path,
) -> anyhow::Result<()> {
    info!(dir = %dir.display(), "command export");

    let written = engine.export()?.write_to_dir(dir)?;
    for path in written {
        println!("Wrote {}.", path.display());
    }
    Ok(())
}

fn cmd_import<K: KvStore, N: Notifier>(
    engine: &mut ReminderEngine<K, N>,
    paths: &[PathBuf],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(files = paths.len(), "command import");

    let files = paths
        .iter()
        .map(|path| TransferFile::read(path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let report = engine.import(&files, now).context("import failed; nothing was changed")?;

    for name in &report.ignored {
        warn!(file = %name, "not imported");
        println!("Skipped {name}: name matches no collection.");
    }
    for kind in &report.replaced {
        println!("Replaced {kind}.");
    }
    if report.replaced.is_empty() {
        println!("Nothing imported.");
    }
    Ok(())
}

fn cmd_notifications(
    renderer: &Renderer,
    data_dir: &Path,
    due: bool,
    drain: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(due, drain, "command notifications");

    let mut spool = SpoolNotifier::open(data_dir)?;
    if drain {
        let drained = spool.drain_due(now)?;
        let rows: Vec<_> = drained.iter().collect();
        return renderer.print_notifications(&rows);
    }

    let rows = if due { spool.due(now) } else { spool.pending() };
    if rows.is_empty() {
        println!("No pending notifications.");
        return Ok(());
    }
    renderer.print_notifications(&rows)
}

/// Maps `--priority` and `--icon` onto the draft symbol. The primary list only
/// takes priorities; the extra list takes either.
fn resolve_symbol(
    extra: bool,
    priority: Option<&str>,
    icon: Option<&str>,
) -> anyhow::Result<Option<String>> {
    match (priority, icon) {
        (Some(raw), _) => Ok(Some(raw.parse::<Priority>()?.symbol().to_string())),
        (None, Some(_)) if !extra => bail!("--icon applies to the extra list; use --priority"),
        (None, icon) => Ok(icon.map(str::to_string)),
    }
}

fn edited_draft<E: Entity>(current: &E, changes: EditChanges) -> ReminderDraft {
    let description = if changes.clear_description {
        None
    } else {
        changes
            .description
            .or_else(|| current.description().map(str::to_string))
    };
    let alarm_at = if changes.clear_alarm {
        None
    } else {
        changes.alarm_at.or(current.alarm_at())
    };

    ReminderDraft {
        title: changes.title.unwrap_or_else(|| current.title().to_string()),
        description,
        symbol: changes
            .symbol
            .unwrap_or_else(|| current.symbol().to_string()),
        alarm_at,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{EditChanges, edited_draft, numbered, resolve_symbol};
    use crate::reminder::{Entity, FilterPreferences, Reminder, ReminderDraft};

    #[test]
    fn priority_names_map_to_symbols() {
        assert_eq!(
            resolve_symbol(false, Some("high"), None).expect("high"),
            Some("🔴".to_string())
        );
        assert_eq!(
            resolve_symbol(true, None, Some("🏋")).expect("icon"),
            Some("🏋".to_string())
        );
        assert!(resolve_symbol(false, None, Some("🏋")).is_err());
        assert!(resolve_symbol(false, Some("urgent"), None).is_err());
        assert_eq!(resolve_symbol(false, None, None).expect("none"), None);
    }

    #[test]
    fn edit_keeps_unspecified_fields_and_honors_clears() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 16, 5, 0, 0)
            .single()
            .expect("valid now");
        let current = Reminder::from_draft(
            "r1".to_string(),
            ReminderDraft::new("Pay rent", "🔴")
                .with_description("landlord")
                .with_alarm(now + Duration::days(1)),
            now,
        );

        let draft = edited_draft(
            &current,
            EditChanges {
                title: Some("Pay rent today".to_string()),
                clear_alarm: true,
                ..EditChanges::default()
            },
        );
        assert_eq!(draft.title, "Pay rent today");
        assert_eq!(draft.description.as_deref(), Some("landlord"));
        assert_eq!(draft.symbol, "🔴");
        assert_eq!(draft.alarm_at, None);

        let draft = edited_draft(
            &current,
            EditChanges {
                clear_description: true,
                symbol: Some("🟢".to_string()),
                ..EditChanges::default()
            },
        );
        assert_eq!(draft.description, None);
        assert_eq!(draft.symbol, "🟢");
        assert_eq!(draft.alarm_at, Some(now + Duration::days(1)));
    }

    #[test]
    fn listing_numbers_only_visible_rows() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 16, 5, 0, 0)
            .single()
            .expect("valid now");
        let items: Vec<Reminder> = [("h1", "🔴"), ("l1", "🟢"), ("h2", "🔴")]
            .into_iter()
            .map(|(id, symbol)| Reminder::from_draft(id.to_string(), ReminderDraft::new(id, symbol), now))
            .collect();
        let high_only = FilterPreferences {
            show_medium: false,
            show_low: false,
            ..FilterPreferences::default()
        };

        let all: Vec<(Option<usize>, String)> = numbered(items.clone(), &high_only, true)
            .into_iter()
            .map(|(pos, item)| (pos, item.id().to_string()))
            .collect();
        assert_eq!(
            all,
            vec![
                (Some(1), "h1".to_string()),
                (None, "l1".to_string()),
                (Some(2), "h2".to_string()),
            ]
        );

        let visible = numbered(items, &high_only, false);
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[1].0, Some(2));
        assert_eq!(visible[1].1.id(), "h2");
    }
}
