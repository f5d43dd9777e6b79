use std::collections::BTreeSet;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::trace;

use crate::datetime::parse_date_expr;
use crate::store::Store;
use crate::task::{
  Priority,
  Task
};

/// Active constraints on the displayed
/// list. `None` on any field leaves that
/// dimension unconstrained.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct FilterCriteria {
  pub from:     Option<NaiveDate>,
  pub to:       Option<NaiveDate>,
  pub project:  Option<String>,
  pub assignee: Option<String>,
  pub priority: Option<Priority>
}

/// Filter terms parsed from the command
/// line. `date` moves the current day
/// used when no range is given.
#[derive(Debug, Clone, Default)]
pub struct ParsedFilter {
  pub criteria: FilterCriteria,
  pub date:     Option<NaiveDate>
}

/// A task as displayed, with the slot it
/// came from.
#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ViewEntry {
  pub date:           NaiveDate,
  pub original_index: usize,
  #[serde(flatten)]
  pub task:           Task
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct Stats {
  pub total:     usize,
  pub completed: usize,
  pub pending:   usize
}

impl Stats {
  pub fn of<'a, I>(tasks: I) -> Self
  where
    I: IntoIterator<Item = &'a Task>
  {
    let mut total = 0;
    let mut completed = 0;
    for task in tasks {
      total += 1;
      if task.done {
        completed += 1;
      }
    }
    Self {
      total,
      completed,
      pending: total - completed
    }
  }

  pub fn of_view(
    view: &[ViewEntry]
  ) -> Self {
    Self::of(
      view.iter().map(|entry| &entry.task)
    )
  }
}

/// Distinct non-blank projects and
/// assignees across every stored date.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct FilterOptions {
  pub projects:  Vec<String>,
  pub assignees: Vec<String>
}

impl FilterOptions {
  #[tracing::instrument(skip(store))]
  pub fn collect(store: &Store) -> Self {
    let mut projects = BTreeSet::new();
    let mut assignees = BTreeSet::new();
    for task in store.values().flatten()
    {
      if !task.project.trim().is_empty()
      {
        projects
          .insert(task.project.clone());
      }
      if !task.assignee.trim().is_empty()
      {
        assignees
          .insert(task.assignee.clone());
      }
    }
    Self {
      projects:  projects
        .into_iter()
        .collect(),
      assignees: assignees
        .into_iter()
        .collect()
    }
  }
}

impl FilterCriteria {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  /// Range bounds in ascending order. A
  /// reversed pair is swapped.
  pub fn normalized_range(
    &self
  ) -> (
    Option<NaiveDate>,
    Option<NaiveDate>
  ) {
    match (self.from, self.to) {
      | (Some(from), Some(to))
        if from > to =>
      {
        (Some(to), Some(from))
      }
      | bounds => bounds
    }
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    if let Some(project) = &self.project
      && task.project != *project
    {
      return false;
    }
    if let Some(assignee) =
      &self.assignee
      && task.assignee != *assignee
    {
      return false;
    }
    if let Some(priority) = self.priority
      && task.priority != priority
    {
      return false;
    }
    true
  }
}

impl ParsedFilter {
  /// Parses `from:`, `to:`, `date:`,
  /// `project:`, `assignee:` and
  /// `priority:` terms. Dates resolve
  /// against `today`.
  #[tracing::instrument(skip(
    terms, today
  ))]
  pub fn parse(
    terms: &[String],
    today: NaiveDate
  ) -> anyhow::Result<Self> {
    let mut out = Self::default();
    for term in terms {
      let (key, value) = term
        .split_once(':')
        .or_else(|| term.split_once('='))
        .ok_or_else(|| {
          anyhow!(
            "unrecognized filter term: \
             {term}"
          )
        })?;

      match key
        .to_ascii_lowercase()
        .as_str()
      {
        | "from" => {
          out.criteria.from = Some(
            parse_date_expr(value, today)?
          );
        }
        | "to" => {
          out.criteria.to = Some(
            parse_date_expr(value, today)?
          );
        }
        | "date" => {
          out.date = Some(
            parse_date_expr(value, today)?
          );
        }
        | "project" | "proj" => {
          out.criteria.project =
            non_blank(value);
        }
        | "assignee" | "who" => {
          out.criteria.assignee =
            non_blank(value);
        }
        | "priority" | "pri" => {
          if value.trim().is_empty() {
            out.criteria.priority = None;
          } else {
            out.criteria.priority = Some(
              Priority::parse(value)
                .ok_or_else(|| {
                  anyhow!(
                    "invalid priority \
                     '{value}'; expected \
                     low, medium or high"
                  )
                })?
            );
          }
        }
        | other => {
          return Err(anyhow!(
            "unknown filter attribute: \
             {other}"
          ));
        }
      }
    }
    Ok(out)
  }
}

fn non_blank(
  value: &str
) -> Option<String> {
  let trimmed = value.trim();
  if trimmed.is_empty() {
    None
  } else {
    Some(trimmed.to_string())
  }
}

/// Builds the displayed list: select by
/// date range (or `current` alone when
/// no bound is set), then narrow by
/// project, assignee and priority.
/// Output is date ascending, stored order
/// within a date.
#[tracing::instrument(skip(
  store, criteria
))]
pub fn compute_view(
  store: &Store,
  criteria: &FilterCriteria,
  current: NaiveDate
) -> Vec<ViewEntry> {
  let selected: Box<
    dyn Iterator<
      Item = (&NaiveDate, &Vec<Task>)
    > + '_
  > = match criteria.normalized_range()
  {
    | (Some(lo), Some(hi)) => {
      Box::new(store.range(lo..=hi))
    }
    | (Some(lo), None) => {
      Box::new(store.range(lo..))
    }
    | (None, Some(hi)) => {
      Box::new(store.range(..=hi))
    }
    | (None, None) => {
      Box::new(
        store.range(current..=current)
      )
    }
  };

  let view: Vec<ViewEntry> = selected
    .flat_map(|(date, tasks)| {
      tasks.iter().enumerate().map(
        move |(idx, task)| {
          (*date, idx, task)
        }
      )
    })
    .filter(|(_, _, task)| {
      criteria.matches(task)
    })
    .map(|(date, idx, task)| {
      ViewEntry {
        date,
        original_index: idx,
        task: task.clone()
      }
    })
    .collect();

  trace!(
    count = view.len(),
    "computed filtered view"
  );
  view
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    FilterCriteria,
    FilterOptions,
    ParsedFilter,
    Stats,
    compute_view
  };
  use crate::store::Store;
  use crate::task::{
    DEFAULT_PROJECT,
    Priority,
    Task,
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

  fn scenario_store() -> Store {
    let a = Task::from_draft(
      &TaskDraft::new("A")
        .project("P1")
        .assignee("U1")
        .priority(Priority::High),
      1
    );
    let mut b = Task::from_draft(
      &TaskDraft::new("B")
        .project("P2")
        .assignee("U2")
        .priority(Priority::Low),
      2
    );
    b.done = true;

    let mut store = Store::new();
    store.insert(day(2024, 1, 1), vec![a]);
    store.insert(day(2024, 1, 2), vec![b]);
    store
  }

  fn texts(
    view: &[super::ViewEntry]
  ) -> Vec<(String, NaiveDate, usize)> {
    view
      .iter()
      .map(|e| {
        (
          e.task.text.clone(),
          e.date,
          e.original_index
        )
      })
      .collect()
  }

  #[test]
  fn range_spans_dates_in_order() {
    let store = scenario_store();
    let criteria = FilterCriteria {
      from: Some(day(2024, 1, 1)),
      to: Some(day(2024, 1, 2)),
      ..FilterCriteria::default()
    };
    let view = compute_view(
      &store,
      &criteria,
      day(2024, 3, 1)
    );
    assert_eq!(
      texts(&view),
      vec![
        (
          "A".to_string(),
          day(2024, 1, 1),
          0
        ),
        (
          "B".to_string(),
          day(2024, 1, 2),
          0
        ),
      ]
    );
    assert_eq!(
      Stats::of_view(&view),
      Stats {
        total:     2,
        completed: 1,
        pending:   1
      }
    );
  }

  #[test]
  fn reversed_range_matches_forward_range()
  {
    let store = scenario_store();
    let forward = FilterCriteria {
      from: Some(day(2024, 1, 1)),
      to: Some(day(2024, 1, 2)),
      ..FilterCriteria::default()
    };
    let reversed = FilterCriteria {
      from: Some(day(2024, 1, 2)),
      to: Some(day(2024, 1, 1)),
      ..FilterCriteria::default()
    };
    let today = day(2024, 3, 1);
    assert_eq!(
      compute_view(
        &store, &forward, today
      ),
      compute_view(
        &store, &reversed, today
      )
    );
  }

  #[test]
  fn priority_narrows_range() {
    let store = scenario_store();
    let criteria = FilterCriteria {
      from: Some(day(2024, 1, 1)),
      to: Some(day(2024, 1, 2)),
      priority: Some(Priority::High),
      ..FilterCriteria::default()
    };
    let view = compute_view(
      &store,
      &criteria,
      day(2024, 3, 1)
    );
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].task.text, "A");
  }

  #[test]
  fn open_ended_bounds() {
    let store = scenario_store();
    let today = day(2024, 3, 1);
    let from_only = FilterCriteria {
      from: Some(day(2024, 1, 2)),
      ..FilterCriteria::default()
    };
    let to_only = FilterCriteria {
      to: Some(day(2024, 1, 1)),
      ..FilterCriteria::default()
    };
    assert_eq!(
      texts(&compute_view(
        &store, &from_only, today
      ))[0]
        .0,
      "B"
    );
    let view =
      compute_view(&store, &to_only, today);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].task.text, "A");
  }

  #[test]
  fn no_range_uses_current_date_only() {
    let store = scenario_store();
    let view = compute_view(
      &store,
      &FilterCriteria::default(),
      day(2024, 1, 2)
    );
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].task.text, "B");

    let empty = compute_view(
      &Store::new(),
      &FilterCriteria::default(),
      day(2024, 3, 1)
    );
    assert!(empty.is_empty());
    assert_eq!(
      Stats::of_view(&empty),
      Stats::default()
    );
  }

  #[test]
  fn default_project_filter_finds_blank_projects()
   {
    let mut store = scenario_store();
    store.insert(day(2024, 1, 3), vec![
      Task::from_draft(
        &TaskDraft::new("C"),
        3
      ),
    ]);
    let criteria = FilterCriteria {
      from: Some(day(2024, 1, 1)),
      to: Some(day(2024, 1, 3)),
      project: Some(
        DEFAULT_PROJECT.to_string()
      ),
      ..FilterCriteria::default()
    };
    let view = compute_view(
      &store,
      &criteria,
      day(2024, 3, 1)
    );
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].task.text, "C");
  }

  #[test]
  fn options_are_distinct_and_sorted() {
    let mut store = scenario_store();
    store.insert(day(2024, 1, 5), vec![
      Task::from_draft(
        &TaskDraft::new("D")
          .project("P1")
          .assignee("U0"),
        4
      ),
    ]);
    let options =
      FilterOptions::collect(&store);
    assert_eq!(options.projects, vec![
      "P1", "P2"
    ]);
    assert_eq!(options.assignees, vec![
      "U0", "U1", "U2"
    ]);
  }

  #[test]
  fn parses_filter_terms() {
    let today = day(2024, 3, 1);
    let parsed = ParsedFilter::parse(
      &[
        "from:-1d".to_string(),
        "to:today".to_string(),
        "pri:h".to_string(),
        "project:P1".to_string(),
        "date:2024-01-01".to_string()
      ],
      today
    )
    .unwrap();
    assert_eq!(
      parsed.criteria.from,
      Some(day(2024, 2, 29))
    );
    assert_eq!(
      parsed.criteria.to,
      Some(today)
    );
    assert_eq!(
      parsed.criteria.priority,
      Some(Priority::High)
    );
    assert_eq!(
      parsed.criteria.project.as_deref(),
      Some("P1")
    );
    assert_eq!(
      parsed.date,
      Some(day(2024, 1, 1))
    );

    assert!(
      ParsedFilter::parse(
        &["pri:urgent".to_string()],
        today
      )
      .is_err()
    );
    assert!(
      ParsedFilter::parse(
        &["colour:red".to_string()],
        today
      )
      .is_err()
    );
  }
}
