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
  trace,
  warn
};

const RC_ENV_VAR: &str = "DAYLISTRC";
const RC_FILE: &str = ".daylistrc";
const MAX_INCLUDE_DEPTH: usize = 8;

const DEFAULTS: [(&str, &str); 4] = [
  ("data.location", "~/.daylist"),
  ("default.command", "list"),
  ("color", "on"),
  ("seed", "on")
];

/// Flat `key = value` settings from the
/// rc file, its includes, and command
/// line overrides.
#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Setting(&'a str, &'a str)
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
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
    let mut cfg = Self::default();

    match resolve_rc_path(rc_override)? {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.load_file(&path, 0)?;
      }
      | None => {
        debug!(
          "no rc file found; using \
           defaults"
        );
      }
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
  ) -> anyhow::Result<Option<bool>> {
    self
      .map
      .get(key)
      .map(|v| {
        parse_bool(v).ok_or_else(|| {
          anyhow!(
            "invalid boolean for {key}: \
             {v}"
          )
        })
      })
      .transpose()
  }

  /// Whether an empty store gets the
  /// welcome task.
  pub fn seed_enabled(
    &self
  ) -> anyhow::Result<bool> {
    Ok(
      self
        .get_bool("seed")?
        .unwrap_or(true)
    )
  }

  pub fn timezone(
    &self
  ) -> Option<String> {
    self
      .get("timezone")
      .filter(|tz| !tz.trim().is_empty())
  }

  /// Sorted by key.
  pub fn entries(
    &self
  ) -> Vec<(&String, &String)> {
    let mut out: Vec<_> =
      self.map.iter().collect();
    out.sort();
    out
  }

  fn load_file(
    &mut self,
    path: &Path,
    depth: usize
  ) -> anyhow::Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
      return Err(anyhow!(
        "rc includes nested deeper than \
         {MAX_INCLUDE_DEPTH} at {}",
        path.display()
      ));
    }

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
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = parse_rc_line(raw_line)
        .with_context(|| {
          format!(
            "invalid config line {}:{}",
            path.display(),
            line_num + 1
          )
        })?;

      match line {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let include_path =
            resolve_include_path(
              &base_dir, target
            )?;
          if include_path.exists() {
            self.load_file(
              &include_path,
              depth + 1
            )?;
          } else {
            warn!(include = %include_path.display(), "include file does not exist; skipping");
          }
        }
        | RcLine::Setting(key, value) => {
          trace!(key, value, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

fn parse_rc_line(
  raw: &str
) -> anyhow::Result<RcLine<'_>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(RcLine::Blank);
  }

  if let Some(rest) =
    line.strip_prefix("include ")
  {
    return Ok(RcLine::Include(
      rest.trim()
    ));
  }

  let (k, v) =
    line.split_once('=').ok_or_else(
      || anyhow!("expected KEY = VALUE, got: {raw}")
    )?;
  let key = k.trim();
  if key.is_empty() {
    return Err(anyhow!(
      "empty key in: {raw}"
    ));
  }
  Ok(RcLine::Setting(key, v.trim()))
}

/// Data directory from `--data`, then
/// `data.location`, created if missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => {
      let location = cfg
        .get("data.location")
        .ok_or_else(|| {
          anyhow!(
            "data.location is not set"
          )
        })?;
      expand_tilde(Path::new(&location))
    }
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

fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  let candidate = home.join(RC_FILE);
  Ok(candidate.exists().then_some(candidate))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.is_empty() {
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

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on" | "true" => {
      Some(true)
    }
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::{
    Config,
    RcLine,
    parse_rc_line
  };

  #[test]
  fn rc_lines_strip_comments() {
    assert_eq!(
      parse_rc_line("  # only a comment")
        .unwrap(),
      RcLine::Blank
    );
    assert_eq!(
      parse_rc_line("color = off # quiet")
        .unwrap(),
      RcLine::Setting("color", "off")
    );
    assert_eq!(
      parse_rc_line("include extra.rc")
        .unwrap(),
      RcLine::Include("extra.rc")
    );
    assert!(
      parse_rc_line("no equals here")
        .is_err()
    );
  }

  #[test]
  fn loads_file_with_include_and_overrides()
  {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
      dir.path().join("extra.rc"),
      "timezone = Europe/Berlin\n"
    )
    .unwrap();
    let main = dir.path().join("main.rc");
    fs::write(
      &main,
      "seed = off\ninclude extra.rc\n\
       include missing.rc\n"
    )
    .unwrap();

    let mut cfg =
      Config::load(Some(main.as_path()))
        .unwrap();
    assert_eq!(cfg.loaded_files.len(), 2);
    assert!(!cfg.seed_enabled().unwrap());
    assert_eq!(
      cfg.timezone().as_deref(),
      Some("Europe/Berlin")
    );
    assert_eq!(
      cfg.get("default.command").as_deref(),
      Some("list")
    );

    cfg.apply_overrides([(
      "rc.color".to_string(),
      "off".to_string()
    )]);
    assert_eq!(
      cfg.get_bool("color").unwrap(),
      Some(false)
    );
  }

  #[test]
  fn bad_boolean_is_an_error() {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "seed".to_string(),
      "maybe".to_string()
    )]);
    assert!(cfg.seed_enabled().is_err());
  }
}
