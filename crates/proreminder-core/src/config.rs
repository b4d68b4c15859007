use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace
};

const RC_ENV: &str = "PROREMINDERRC";
const RC_FILE_NAME: &str =
  ".proreminderrc";
const DEFAULT_DATA_DIR: &str =
  "~/.proreminder";

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "data.location".to_string(),
      DEFAULT_DATA_DIR.to_string()
    );
    map.insert(
      "notifications".to_string(),
      "on".to_string()
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  /// Configured IANA zone name, if any.
  pub fn timezone(
    &self
  ) -> Option<String> {
    self
      .get("timezone")
      .map(|tz| tz.trim().to_string())
      .filter(|tz| !tz.is_empty())
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = raw_line
        .split_once('#')
        .map_or(raw_line, |(before, _)| {
          before
        })
        .trim();
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          tracing::warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// `--data` wins over `data.location`; the directory is created when missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else {
    let configured = cfg
      .get("data.location")
      .unwrap_or_else(|| {
        DEFAULT_DATA_DIR.to_string()
      });
    expand_tilde(Path::new(&configured))
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    return Ok(None);
  };
  let candidate =
    home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    resolve_data_dir
  };

  #[test]
  fn rc_file_with_include_and_comments()
  {
    let temp =
      tempdir().expect("tempdir");
    let main = temp.path().join("rc");
    let extra =
      temp.path().join("extra.rc");
    fs::write(
      &main,
      "# settings\nnotifications = \
       off  # quiet\ninclude \
       extra.rc\ninclude \
       missing.rc\n"
    )
    .expect("write rc");
    fs::write(
      &extra,
      "timezone = Europe/Madrid\n"
    )
    .expect("write include");

    let cfg = Config::load(Some(&main))
      .expect("load");
    assert_eq!(
      cfg.get_bool("notifications"),
      Some(false)
    );
    assert_eq!(
      cfg.timezone().as_deref(),
      Some("Europe/Madrid")
    );
    assert_eq!(
      cfg.get_bool("color"),
      Some(true)
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn malformed_line_is_an_error() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("rc");
    fs::write(&rc, "just words\n")
      .expect("write rc");

    let err = Config::load(Some(&rc))
      .expect_err("invalid line");
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn overrides_strip_the_rc_prefix_and_win()
  {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![
      (
        "rc.color".to_string(),
        "off".to_string()
      ),
      (
        "timezone".to_string(),
        " ".to_string()
      ),
    ]);

    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );
    assert_eq!(cfg.timezone(), None);
  }

  #[test]
  fn data_dir_override_is_created() {
    let temp =
      tempdir().expect("tempdir");
    let target =
      temp.path().join("nested/data");

    let dir = resolve_data_dir(
      &Config::default(),
      Some(&target)
    )
    .expect("resolve");
    assert_eq!(dir, target);
    assert!(target.is_dir());
  }
}
