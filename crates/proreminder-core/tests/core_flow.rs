use std::fs;

use chrono::{Duration, SubsecRound, Utc};
use proreminder_core::kv::FileKvStore;
use proreminder_core::notify::SpoolNotifier;
use proreminder_core::reminder::FilterPreferences;
use proreminder_core::transfer::{EXTRA_FILE, PRIMARY_FILE, TransferFile};
use proreminder_core::{Extra, Primary, ReminderDraft, ReminderEngine, ReminderError};
use serde_json::Value;
use tempfile::tempdir;

fn open_engine(dir: &std::path::Path) -> ReminderEngine<FileKvStore, SpoolNotifier> {
    let kv = FileKvStore::open(dir).expect("open kv");
    let spool = SpoolNotifier::open(dir).expect("open spool");
    ReminderEngine::new(kv, spool)
}

#[test]
fn file_backed_engine_survives_restart() {
    let temp = tempdir().expect("tempdir");
    let now = Utc::now().trunc_subsecs(3);

    let mut engine = open_engine(temp.path());
    engine.init(now).expect("init");
    let added = engine
        .add::<Primary>(
            ReminderDraft::new("Pay rent", "🔴")
                .with_description("landlord")
                .with_alarm(now + Duration::days(1)),
            now,
        )
        .expect("add")
        .applied()
        .expect("applied");
    engine
        .add::<Extra>(ReminderDraft::new("Gym bag", "🎒"), now)
        .expect("add extra");
    engine
        .set_filters::<Primary>(FilterPreferences {
            custom_order: true,
            ..FilterPreferences::default()
        })
        .expect("filters");
    engine.close();

    let mut reopened = open_engine(temp.path());
    let report = reopened.init(now).expect("reinit");
    assert_eq!(report.migrated, 0);
    assert_eq!(report.scheduled, 1);

    assert_eq!(reopened.load::<Primary>().expect("load"), vec![added]);
    assert_eq!(reopened.load::<Extra>().expect("load extra").len(), 1);
    assert!(reopened.filters::<Primary>().expect("filters").custom_order);

    let pending = reopened.notifier().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].title, "🔴 Pay rent");
    assert_eq!(pending[0].body, "landlord");
}

#[test]
fn legacy_file_gets_ids_written_back() {
    let temp = tempdir().expect("tempdir");
    fs::write(
        temp.path().join("reminders.json"),
        r#"[
            {"title":"Call mum","desc":"","datetime":"2025-12-01T09:00:00.000Z","emoji":"🟡"},
            {"title":"Taxes","desc":"form 100","datetime":"2025-12-02T09:00:00.000Z","emoji":"🔴"}
        ]"#,
    )
    .expect("seed legacy file");

    let mut engine = open_engine(temp.path());
    let report = engine.init(Utc::now()).expect("init");
    assert_eq!(report.migrated, 2);

    let raw = fs::read_to_string(temp.path().join("reminders.json")).expect("read back");
    let rows: Value = serde_json::from_str(&raw).expect("json");
    let ids: Vec<&str> = rows
        .as_array()
        .expect("array")
        .iter()
        .map(|row| row["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|id| id.starts_with("reminder_")));
    assert_ne!(ids[0], ids[1]);
    assert_eq!(rows[1]["desc"], "form 100");
}

#[test]
fn export_then_import_reproduces_both_collections() {
    let source = tempdir().expect("source");
    let target = tempdir().expect("target");
    let out = tempdir().expect("export dir");
    let now = Utc::now().trunc_subsecs(3);

    let mut engine = open_engine(source.path());
    engine.init(now).expect("init");
    for (title, symbol) in [("a", "🔴"), ("b", "🟢"), ("c", "🟡")] {
        engine
            .add::<Primary>(ReminderDraft::new(title, symbol), now)
            .expect("add");
    }
    engine
        .add::<Extra>(
            ReminderDraft::new("water plants", "🪴").with_alarm(now + Duration::hours(4)),
            now,
        )
        .expect("add extra");

    let written = engine
        .export()
        .expect("export")
        .write_to_dir(out.path())
        .expect("write export");
    assert_eq!(written.len(), 2);

    let files: Vec<TransferFile> = [PRIMARY_FILE, EXTRA_FILE]
        .iter()
        .map(|name| TransferFile::read(&out.path().join(name)).expect("read export"))
        .collect();

    let mut fresh = open_engine(target.path());
    fresh.init(now).expect("init fresh");
    let report = fresh.import(&files, now).expect("import");
    assert_eq!(report.replaced.len(), 2);
    assert_eq!(report.migrated, 0);
    assert_eq!(report.scheduled, 1);

    assert_eq!(
        fresh.load::<Primary>().expect("load"),
        engine.load::<Primary>().expect("load source")
    );
    assert_eq!(
        fresh.load::<Extra>().expect("load extra"),
        engine.load::<Extra>().expect("load source extra")
    );
}

#[test]
fn malformed_import_leaves_disk_untouched() {
    let temp = tempdir().expect("tempdir");
    let now = Utc::now();

    let mut engine = open_engine(temp.path());
    engine.init(now).expect("init");
    engine
        .add::<Primary>(ReminderDraft::new("keep", "🔴"), now)
        .expect("add");
    let before = fs::read_to_string(temp.path().join("reminders.json")).expect("read");

    let files = vec![
        TransferFile::new(PRIMARY_FILE, "[]"),
        TransferFile::new(EXTRA_FILE, "[{\"title\": 3}]"),
    ];
    let err = engine.import(&files, now).expect_err("malformed batch");
    assert!(matches!(
        err.downcast_ref::<ReminderError>(),
        Some(ReminderError::ImportMalformed { .. })
    ));

    let after = fs::read_to_string(temp.path().join("reminders.json")).expect("read");
    assert_eq!(before, after);
    assert!(!temp.path().join("extrareminders.json").exists());
}
