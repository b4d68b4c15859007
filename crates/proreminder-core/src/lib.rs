pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod engine;
pub mod error;
pub mod filter;
pub mod identity;
pub mod kv;
pub mod notify;
pub mod reminder;
pub mod render;
pub mod reorder;
pub mod store;
pub mod transfer;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use engine::{
  ImportReport,
  Outcome,
  ReminderEngine,
  StartupReport
};
pub use error::ReminderError;
pub use kv::{
  FileKvStore,
  KvStore,
  MemoryKvStore
};
pub use notify::{
  DisabledNotifier,
  Notifier,
  RecordingNotifier,
  SpoolNotifier
};
pub use reminder::{
  ExtraReminder,
  Reminder,
  ReminderDraft
};
pub use store::{
  CollectionKind,
  Extra,
  Primary
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting proreminder"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );
  datetime::configure_project_timezone(
    cfg.timezone().as_deref()
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let kv = FileKvStore::open(&data_dir)
    .with_context(|| {
      format!(
        "failed to open store at {}",
        data_dir.display()
      )
    })?;

  let notifier: Box<dyn Notifier> =
    if cfg
      .get_bool("notifications")
      .unwrap_or(true)
    {
      Box::new(SpoolNotifier::open(
        &data_dir
      )?)
    } else {
      debug!("notifications disabled by config");
      Box::new(DisabledNotifier)
    };

  let now = Utc::now();
  let mut engine =
    ReminderEngine::new(kv, notifier);
  let startup = engine.init(now)?;
  debug!(?startup, "startup complete");

  let renderer =
    render::Renderer::new(&cfg)?;
  let command =
    cli.command.unwrap_or(
      cli::Command::List {
        target: cli::Target::default(),
        all:    false
      }
    );

  let result = commands::dispatch(
    &mut engine,
    &renderer,
    &data_dir,
    command,
    now
  );
  engine.close();
  result?;

  info!("done");
  Ok(())
}
