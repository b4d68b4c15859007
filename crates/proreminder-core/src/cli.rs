use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

/// `on`/`off` style switch for filter flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggle(pub bool);

impl std::str::FromStr for Toggle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => Ok(Toggle(true)),
            "off" | "no" | "false" | "0" => Ok(Toggle(false)),
            other => Err(anyhow!("expected on or off, got: {other}")),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "proreminder",
    version,
    about = "Prioritized reminders with local alarm notifications",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Defaults to `list`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct Target {
    /// Operate on the extra list instead of the prioritized one.
    #[arg(long)]
    pub extra: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a reminder.
    Add {
        #[command(flatten)]
        target: Target,
        title: String,
        #[arg(long = "desc")]
        description: Option<String>,
        /// high, medium, low or one of 🔴 🟡 🟢.
        #[arg(long, short = 'p', conflicts_with = "icon")]
        priority: Option<String>,
        /// Free-form icon for extra reminders.
        #[arg(long, short = 'i')]
        icon: Option<String>,
        #[arg(long, short = 'a')]
        alarm: Option<String>,
    },
    /// Change fields of an existing reminder; unspecified fields are kept.
    Edit {
        #[command(flatten)]
        target: Target,
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "desc", conflicts_with = "clear_desc")]
        description: Option<String>,
        #[arg(long)]
        clear_desc: bool,
        #[arg(long, short = 'p', conflicts_with = "icon")]
        priority: Option<String>,
        #[arg(long, short = 'i')]
        icon: Option<String>,
        #[arg(long, short = 'a', conflicts_with = "clear_alarm")]
        alarm: Option<String>,
        #[arg(long)]
        clear_alarm: bool,
    },
    Delete {
        #[command(flatten)]
        target: Target,
        id: String,
    },
    List {
        #[command(flatten)]
        target: Target,
        /// Ignore filter preferences.
        #[arg(long)]
        all: bool,
    },
    /// Move a visible reminder; positions are 1-based as printed by `list`.
    Move {
        #[command(flatten)]
        target: Target,
        from: usize,
        to: usize,
    },
    /// Show or change filter preferences.
    Filter {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        high: Option<Toggle>,
        #[arg(long)]
        medium: Option<Toggle>,
        #[arg(long)]
        low: Option<Toggle>,
        #[arg(long)]
        custom: Option<Toggle>,
    },
    /// Write both transfer files into a directory.
    Export { dir: PathBuf },
    /// Replace collections from transfer files.
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Inspect the pending notification spool.
    Notifications {
        /// Only entries whose time has come.
        #[arg(long)]
        due: bool,
        /// Remove due entries after printing them.
        #[arg(long)]
        drain: bool,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, Toggle, preprocess_args};

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "proreminder",
            "rc.color=off",
            "list",
            "rc.notifications:off",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, args(&["proreminder", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.notifications".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = GlobalCli::try_parse_from(args(&[
            "proreminder",
            "add",
            "Pay rent",
            "--priority",
            "high",
            "-vv",
            "--rc",
            "color=off",
        ]))
        .expect("parse");

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides[0].key, "color");
        match cli.command {
            Some(Command::Add {
                title, priority, target, ..
            }) => {
                assert_eq!(title, "Pay rent");
                assert_eq!(priority.as_deref(), Some("high"));
                assert!(!target.extra);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn filter_toggles_parse_on_and_off() {
        let cli = GlobalCli::try_parse_from(args(&[
            "proreminder",
            "filter",
            "--high",
            "off",
            "--custom",
            "on",
        ]))
        .expect("parse");

        match cli.command {
            Some(Command::Filter {
                high, custom, low, ..
            }) => {
                assert_eq!(high, Some(Toggle(false)));
                assert_eq!(custom, Some(Toggle(true)));
                assert_eq!(low, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!("maybe".parse::<Toggle>().is_err());
    }

    #[test]
    fn missing_subcommand_is_allowed() {
        let cli = GlobalCli::try_parse_from(args(&["proreminder"])).expect("parse");
        assert!(cli.command.is_none());
    }
}
