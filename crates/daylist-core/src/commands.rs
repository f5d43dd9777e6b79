use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use tracing::{
  debug,
  info,
  instrument,
  warn
};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{
  format_date_key,
  local_date,
  parse_date_expr
};
use crate::engine::{
  Engine,
  TaskSelector
};
use crate::filter::{
  FilterCriteria,
  ParsedFilter
};
use crate::render::Renderer;
use crate::store::KvStore;
use crate::task::{
  Priority,
  TaskDraft
};

pub fn known_command_names()
-> Vec<&'static str> {
  vec![
    "add",
    "list",
    "edit",
    "toggle",
    "done",
    "delete",
    "stats",
    "projects",
    "assignees",
    "export",
    "_commands",
    "_show",
    "help",
    "version",
  ]
}

pub fn expand_command_abbrev<'a>(
  token: &'a str,
  known: &[&'a str]
) -> Option<&'a str> {
  if known.contains(&token) {
    return Some(token);
  }

  let mut matches =
    known.iter().copied().filter(
      |name| name.starts_with(token)
    );
  let first = matches.next()?;
  if matches.next().is_some() {
    None
  } else {
    Some(first)
  }
}

/// Shared inputs for one command run.
struct Ctx<'a> {
  cfg:      &'a Config,
  renderer: &'a mut Renderer,
  filter:   ParsedFilter,
  today:    NaiveDate,
  now:      DateTime<Utc>
}

impl Ctx<'_> {
  fn current_date(&self) -> NaiveDate {
    self.filter.date.unwrap_or(self.today)
  }
}

#[instrument(skip(
  engine, cfg, renderer, inv, now
))]
pub fn dispatch<K: KvStore>(
  engine: &mut Engine<K>,
  cfg: &Config,
  renderer: &mut Renderer,
  inv: Invocation,
  now: DateTime<Utc>
) -> anyhow::Result<()> {
  let today = local_date(now);
  let filter = ParsedFilter::parse(
    &inv.filter_terms,
    today
  )
  .context("invalid filter")?;

  debug!(
    command = %inv.command,
    filter = ?filter,
    args = ?inv.command_args,
    "dispatching command"
  );

  let mut ctx = Ctx {
    cfg,
    renderer,
    filter,
    today,
    now
  };
  let args = inv.command_args.as_slice();

  match inv.command.as_str() {
    | "add" => cmd_add(engine, &mut ctx, args),
    | "list" => cmd_list(engine, &mut ctx),
    | "edit" => {
      cmd_edit(engine, &mut ctx, args)
    }
    | "toggle" | "done" => {
      cmd_toggle(engine, &mut ctx, args)
    }
    | "delete" => {
      cmd_delete(engine, &mut ctx, args)
    }
    | "stats" => cmd_stats(engine, &mut ctx),
    | "projects" => {
      let options =
        engine.filter_options()?;
      ctx.renderer.print_lines(
        options.projects
      )
    }
    | "assignees" => {
      let options =
        engine.filter_options()?;
      ctx.renderer.print_lines(
        options.assignees
      )
    }
    | "export" => cmd_export(engine, &ctx),
    | "_commands" => {
      ctx.renderer.print_lines(
        known_command_names()
      )
    }
    | "_show" => {
      let lines: Vec<String> = ctx
        .cfg
        .entries()
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
      ctx.renderer.print_lines(lines)
    }
    | "help" => cmd_help(),
    | "version" => {
      println!(
        "{}",
        env!("CARGO_PKG_VERSION")
      );
      Ok(())
    }
    | other => {
      Err(anyhow!(
        "unknown command: {other}"
      ))
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mod {
  Project(String),
  Assignee(String),
  Priority(Priority),
  Date(NaiveDate)
}

/// Splits free text from `key:value`
/// modifiers. Everything after `--` is
/// text.
fn parse_text_and_mods(
  args: &[String],
  today: NaiveDate
) -> anyhow::Result<(String, Vec<Mod>)> {
  let mut text_parts = Vec::new();
  let mut mods = Vec::new();

  let mut literal = false;
  for arg in args {
    if arg == "--" && !literal {
      literal = true;
      continue;
    }

    if !literal
      && let Some(one_mod) =
        parse_one_mod(arg, today)?
    {
      mods.push(one_mod);
      continue;
    }

    text_parts.push(arg.as_str());
  }

  Ok((text_parts.join(" "), mods))
}

fn parse_one_mod(
  tok: &str,
  today: NaiveDate
) -> anyhow::Result<Option<Mod>> {
  let Some((key, value)) =
    tok.split_once(':')
  else {
    return Ok(None);
  };

  match key
    .to_ascii_lowercase()
    .as_str()
  {
    | "project" | "proj" => {
      Ok(Some(Mod::Project(
        value.to_string()
      )))
    }
    | "assignee" | "who" => {
      Ok(Some(Mod::Assignee(
        value.to_string()
      )))
    }
    | "priority" | "pri" => {
      let priority = Priority::parse(
        value
      )
      .unwrap_or_else(|| {
        warn!(value, "unrecognized priority; using medium");
        Priority::Medium
      });
      Ok(Some(Mod::Priority(priority)))
    }
    | "date" => {
      Ok(Some(Mod::Date(
        parse_date_expr(value, today)?
      )))
    }
    | _ => Ok(None)
  }
}

fn apply_mods(
  draft: &mut TaskDraft,
  mods: &[Mod]
) -> Option<NaiveDate> {
  let mut date = None;
  for one_mod in mods {
    match one_mod {
      | Mod::Project(project) => {
        draft.project = project.clone();
      }
      | Mod::Assignee(assignee) => {
        draft.assignee = assignee.clone();
      }
      | Mod::Priority(priority) => {
        draft.priority = Some(*priority);
      }
      | Mod::Date(d) => date = Some(*d)
    }
  }
  date
}

/// `<DATE> <INDEX|UUID>` at the head of
/// the command arguments.
fn parse_address<'a>(
  args: &'a [String],
  today: NaiveDate
) -> anyhow::Result<(
  NaiveDate,
  TaskSelector,
  &'a [String]
)> {
  let [date, selector, rest @ ..] = args
  else {
    return Err(anyhow!(
      "expected <DATE> <INDEX|ID>"
    ));
  };
  let date = parse_date_expr(date, today)?;
  let selector: TaskSelector =
    selector.parse()?;
  Ok((date, selector, rest))
}

fn warn_extra_args(
  command: &str,
  rest: &[String]
) {
  if !rest.is_empty() {
    warn!(
      command,
      extra = ?rest,
      "ignoring extra arguments"
    );
  }
}

fn selector_label(
  selector: TaskSelector
) -> String {
  match selector {
    | TaskSelector::Index(idx) => {
      format!("#{idx}")
    }
    | TaskSelector::Id(id) => id.to_string()
  }
}

fn show_view<K: KvStore>(
  engine: &Engine<K>,
  ctx: &mut Ctx<'_>,
  criteria: &FilterCriteria,
  current: NaiveDate
) -> anyhow::Result<()> {
  let snapshot =
    engine.snapshot(criteria, current)?;
  ctx.renderer.print_view(
    &snapshot.view,
    snapshot.stats,
    ctx.today
  )
}

#[instrument(skip(engine, ctx, args))]
fn cmd_add<K: KvStore>(
  engine: &mut Engine<K>,
  ctx: &mut Ctx<'_>,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command add");

  let (text, mods) =
    parse_text_and_mods(args, ctx.today)?;
  let mut draft = TaskDraft::new(text);
  let date = apply_mods(&mut draft, &mods)
    .unwrap_or_else(|| ctx.current_date());

  let Some(added) =
    engine.add(&draft, date, ctx.now)?
  else {
    println!(
      "No task added: text is empty."
    );
    return Ok(());
  };

  println!(
    "Created task #{} on {} ({}).",
    added.index,
    format_date_key(added.date),
    added.id
  );
  let criteria = ctx.filter.criteria.clone();
  show_view(engine, ctx, &criteria, date)
}

#[instrument(skip(engine, ctx))]
fn cmd_list<K: KvStore>(
  engine: &mut Engine<K>,
  ctx: &mut Ctx<'_>
) -> anyhow::Result<()> {
  info!("command list");
  let criteria = ctx.filter.criteria.clone();
  let current = ctx.current_date();
  show_view(engine, ctx, &criteria, current)
}

#[instrument(skip(engine, ctx))]
fn cmd_stats<K: KvStore>(
  engine: &mut Engine<K>,
  ctx: &mut Ctx<'_>
) -> anyhow::Result<()> {
  let snapshot = engine.snapshot(
    &ctx.filter.criteria,
    ctx.current_date()
  )?;
  ctx.renderer.print_stats(snapshot.stats)
}

#[instrument(skip(engine, ctx, args))]
fn cmd_edit<K: KvStore>(
  engine: &mut Engine<K>,
  ctx: &mut Ctx<'_>,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command edit");

  let (date, selector, rest) =
    parse_address(args, ctx.today)?;
  let (text, mods) =
    parse_text_and_mods(rest, ctx.today)?;
  if text.trim().is_empty()
    && mods.is_empty()
  {
    return Err(anyhow!(
      "edit: nothing to change"
    ));
  }
  if mods
    .iter()
    .any(|m| matches!(m, Mod::Date(_)))
  {
    return Err(anyhow!(
      "edit: a task's date cannot be \
       changed"
    ));
  }

  let Some(current) =
    engine.begin_edit(date, selector)?
  else {
    println!(
      "No task {} on {}.",
      selector_label(selector),
      format_date_key(date)
    );
    return Ok(());
  };

  let mut draft =
    TaskDraft::from_task(&current);
  if !text.trim().is_empty() {
    draft.text = text;
  }
  apply_mods(&mut draft, &mods);

  if engine.save_edit(&draft)? {
    println!(
      "Modified task {} on {}.",
      selector_label(selector),
      format_date_key(date)
    );
  } else {
    println!("No changes saved.");
  }

  let criteria = ctx.filter.criteria.clone();
  show_view(engine, ctx, &criteria, date)
}

#[instrument(skip(engine, ctx, args))]
fn cmd_toggle<K: KvStore>(
  engine: &mut Engine<K>,
  ctx: &mut Ctx<'_>,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command toggle");

  let (date, selector, rest) =
    parse_address(args, ctx.today)?;
  warn_extra_args("toggle", rest);

  match engine.toggle(date, selector)? {
    | Some(done) => {
      println!(
        "Marked task {} on {} as {}.",
        selector_label(selector),
        format_date_key(date),
        if done { "done" } else { "pending" }
      );
    }
    | None => {
      println!(
        "No task {} on {}.",
        selector_label(selector),
        format_date_key(date)
      );
      return Ok(());
    }
  }

  let criteria = ctx.filter.criteria.clone();
  show_view(engine, ctx, &criteria, date)
}

#[instrument(skip(engine, ctx, args))]
fn cmd_delete<K: KvStore>(
  engine: &mut Engine<K>,
  ctx: &mut Ctx<'_>,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command delete");

  let (date, selector, rest) =
    parse_address(args, ctx.today)?;
  warn_extra_args("delete", rest);

  match engine.delete(date, selector)? {
    | Some(task) => {
      println!(
        "Deleted '{}' from {}.",
        task.text,
        format_date_key(date)
      );
    }
    | None => {
      println!(
        "No task {} on {}.",
        selector_label(selector),
        format_date_key(date)
      );
      return Ok(());
    }
  }

  let criteria = ctx.filter.criteria.clone();
  show_view(engine, ctx, &criteria, date)
}

#[instrument(skip(engine, ctx))]
fn cmd_export<K: KvStore>(
  engine: &Engine<K>,
  ctx: &Ctx<'_>
) -> anyhow::Result<()> {
  info!("command export");
  let view = engine.view(
    &ctx.filter.criteria,
    ctx.current_date()
  )?;
  println!(
    "{}",
    serde_json::to_string(&view)?
  );
  Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
  println!(
    "usage: daylist [filter terms] \
     <command> [args]\n\n\
     commands:\n  \
     add <text> [project:X] \
     [assignee:X] [priority:P] \
     [date:D]\n  \
     list\n  \
     edit <DATE> <INDEX|ID> [text] \
     [project:X] [assignee:X] \
     [priority:P]\n  \
     toggle <DATE> <INDEX|ID>\n  \
     delete <DATE> <INDEX|ID>\n  \
     stats | projects | assignees | \
     export\n\n\
     filter terms: from:D to:D date:D \
     project:X assignee:X priority:P"
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    Mod,
    apply_mods,
    expand_command_abbrev,
    known_command_names,
    parse_address,
    parse_text_and_mods
  };
  use crate::engine::TaskSelector;
  use crate::task::{
    Priority,
    TaskDraft
  };

  fn day(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .unwrap()
  }

  fn strings(
    items: &[&str]
  ) -> Vec<String> {
    items
      .iter()
      .map(|s| s.to_string())
      .collect()
  }

  #[test]
  fn abbreviations_must_be_unique() {
    let known = known_command_names();
    assert_eq!(
      expand_command_abbrev("ad", &known),
      Some("add")
    );
    assert_eq!(
      expand_command_abbrev("de", &known),
      Some("delete")
    );
    assert_eq!(
      expand_command_abbrev("d", &known),
      None
    );
    assert_eq!(
      expand_command_abbrev("done", &known),
      Some("done")
    );
  }

  #[test]
  fn text_and_mods_are_separated() {
    let today = day(2024, 3, 1);
    let (text, mods) = parse_text_and_mods(
      &strings(&[
        "buy",
        "project:Home",
        "milk",
        "pri:h",
        "date:tomorrow",
        "--",
        "who:me"
      ]),
      today
    )
    .unwrap();
    assert_eq!(text, "buy milk who:me");
    assert_eq!(mods, vec![
      Mod::Project("Home".to_string()),
      Mod::Priority(Priority::High),
      Mod::Date(day(2024, 3, 2)),
    ]);

    let mut draft = TaskDraft::new(text);
    let date = apply_mods(&mut draft, &mods);
    assert_eq!(date, Some(day(2024, 3, 2)));
    assert_eq!(draft.project, "Home");
    assert_eq!(
      draft.priority,
      Some(Priority::High)
    );
  }

  #[test]
  fn unknown_priority_becomes_medium() {
    let (_, mods) = parse_text_and_mods(
      &strings(&["x", "pri:urgent"]),
      day(2024, 3, 1)
    )
    .unwrap();
    assert_eq!(mods, vec![Mod::Priority(
      Priority::Medium
    )]);
  }

  #[test]
  fn address_needs_date_and_selector() {
    let today = day(2024, 3, 1);
    let args =
      strings(&["2024-01-01", "2", "x"]);
    let (date, selector, rest) =
      parse_address(&args, today).unwrap();
    assert_eq!(date, day(2024, 1, 1));
    assert_eq!(
      selector,
      TaskSelector::Index(2)
    );
    assert_eq!(rest, &["x".to_string()]);

    assert!(
      parse_address(
        &strings(&["today"]),
        today
      )
      .is_err()
    );
  }
}
