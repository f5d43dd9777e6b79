pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod engine;
pub mod filter;
pub mod render;
pub mod store;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
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
    "starting daylist"
  );
  debug!(
    overrides = ?pre.rc_overrides,
    "preprocessed rc overrides"
  );

  let mut cfg = config::Config::load(
    cli.rcfile.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );
  datetime::init_calendar_timezone(
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

  let kv =
    store::DirKvStore::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open task store at \
           {}",
          data_dir.display()
        )
      })?;
  let mut engine = engine::Engine::new(
    store::TaskStore::new(kv)
  );

  let now = Utc::now();
  if cfg.seed_enabled()? {
    engine.ensure_seeded(
      datetime::local_date(now),
      now
    )?;
  }

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  commands::dispatch(
    &mut engine,
    &cfg,
    &mut renderer,
    inv,
    now
  )?;

  info!("done");
  Ok(())
}
