use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use serde::Serialize;
use tracing::{
  debug,
  info,
  instrument
};
use uuid::Uuid;

use crate::filter::{
  FilterCriteria,
  FilterOptions,
  Stats,
  ViewEntry,
  compute_view
};
use crate::store::{
  KvStore,
  TaskStore
};
use crate::task::{
  Task,
  TaskDraft
};

/// Picks one task within a date's list,
/// either by position or by stable id.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum TaskSelector {
  Index(usize),
  Id(Uuid)
}

impl TaskSelector {
  pub fn resolve(
    &self,
    tasks: &[Task]
  ) -> Option<usize> {
    match self {
      | Self::Index(idx) => {
        (*idx < tasks.len()).then_some(*idx)
      }
      | Self::Id(id) => {
        tasks
          .iter()
          .position(|task| task.id == *id)
      }
    }
  }
}

impl FromStr for TaskSelector {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    if let Ok(idx) =
      trimmed.parse::<usize>()
    {
      return Ok(Self::Index(idx));
    }
    Uuid::parse_str(trimmed)
      .map(Self::Id)
      .map_err(|_| {
        anyhow!(
          "expected a task index or id, \
           got: {trimmed}"
        )
      })
  }
}

/// Where a freshly added task landed.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Added {
  pub id:    Uuid,
  pub date:  NaiveDate,
  pub index: usize
}

/// The task currently open for editing.
/// `index` locates records whose id is
/// not persisted yet and so changes on
/// every load.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct EditSession {
  pub date:  NaiveDate,
  pub id:    Uuid,
  pub index: usize
}

impl EditSession {
  fn resolve(
    &self,
    tasks: &[Task]
  ) -> Option<usize> {
    TaskSelector::Id(self.id)
      .resolve(tasks)
      .or_else(|| {
        TaskSelector::Index(self.index)
          .resolve(tasks)
      })
  }
}

/// Everything a renderer needs after a
/// mutation or filter change.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
  pub view:    Vec<ViewEntry>,
  pub stats:   Stats,
  pub options: FilterOptions
}

/// Add, edit, toggle and delete against
/// one date's list, plus the derived
/// view. Each mutation is a single
/// per-date read-modify-write.
#[derive(Debug)]
pub struct Engine<K: KvStore> {
  store:   TaskStore<K>,
  editing: Option<EditSession>
}

impl<K: KvStore> Engine<K> {
  pub fn new(store: TaskStore<K>) -> Self {
    Self {
      store,
      editing: None
    }
  }

  pub fn store(&self) -> &TaskStore<K> {
    &self.store
  }

  pub fn into_store(
    self
  ) -> TaskStore<K> {
    self.store
  }

  /// Seeds an empty store with the
  /// welcome task on `today`.
  pub fn ensure_seeded(
    &mut self,
    today: NaiveDate,
    now: DateTime<Utc>
  ) -> anyhow::Result<bool> {
    self.store.seed_if_empty(
      today,
      now.timestamp_millis()
    )
  }

  /// Appends a task to `date`. Returns
  /// `None` without touching the store
  /// when the text is blank.
  #[instrument(skip(self, draft, now))]
  pub fn add(
    &mut self,
    draft: &TaskDraft,
    date: NaiveDate,
    now: DateTime<Utc>
  ) -> anyhow::Result<Option<Added>> {
    if draft.trimmed_text().is_empty() {
      debug!(
        "ignoring add with blank text"
      );
      return Ok(None);
    }

    let task = Task::from_draft(
      draft,
      now.timestamp_millis()
    );
    let id = task.id;
    let index = self.store.update_date(
      date,
      move |tasks| {
        tasks.push(task);
        (tasks.len() - 1, true)
      }
    )?;

    info!(%id, index, "task added");
    Ok(Some(Added {
      id,
      date,
      index
    }))
  }

  /// Overwrites text, project, assignee
  /// and priority. Unknown targets are
  /// ignored; blank text is stored empty.
  #[instrument(skip(self, draft))]
  pub fn edit(
    &mut self,
    date: NaiveDate,
    selector: TaskSelector,
    draft: &TaskDraft
  ) -> anyhow::Result<bool> {
    self.apply_edit(
      date,
      |tasks| selector.resolve(tasks),
      draft
    )
  }

  fn apply_edit<F>(
    &mut self,
    date: NaiveDate,
    locate: F,
    draft: &TaskDraft
  ) -> anyhow::Result<bool>
  where
    F: FnOnce(&[Task]) -> Option<usize>
  {
    let edited = self.store.update_date(
      date,
      |tasks| {
        match locate(tasks) {
          | Some(idx) => {
            tasks[idx].apply_draft(draft);
            (true, true)
          }
          | None => (false, false)
        }
      }
    )?;

    if !edited {
      debug!("edit target not found");
    }
    Ok(edited)
  }

  /// Opens an edit session on a task and
  /// returns its current values.
  #[instrument(skip(self))]
  pub fn begin_edit(
    &mut self,
    date: NaiveDate,
    selector: TaskSelector
  ) -> anyhow::Result<Option<Task>> {
    let tasks =
      self.store.tasks_for(date)?;
    let Some(idx) =
      selector.resolve(&tasks)
    else {
      self.editing = None;
      return Ok(None);
    };
    let task = tasks[idx].clone();
    self.editing = Some(EditSession {
      date,
      id: task.id,
      index: idx
    });
    Ok(Some(task))
  }

  pub fn edit_session(
    &self
  ) -> Option<EditSession> {
    self.editing
  }

  pub fn cancel_edit(&mut self) {
    self.editing = None;
  }

  /// Applies `draft` to the task opened
  /// by [`Engine::begin_edit`] and closes
  /// the session. A no-op without an
  /// open session.
  #[instrument(skip(self, draft))]
  pub fn save_edit(
    &mut self,
    draft: &TaskDraft
  ) -> anyhow::Result<bool> {
    let Some(session) =
      self.editing.take()
    else {
      debug!(
        "save without an open edit \
         session"
      );
      return Ok(false);
    };
    self.apply_edit(
      session.date,
      |tasks| session.resolve(tasks),
      draft
    )
  }

  /// Flips `done`. Returns the new value,
  /// or `None` if the target is missing.
  #[instrument(skip(self))]
  pub fn toggle(
    &mut self,
    date: NaiveDate,
    selector: TaskSelector
  ) -> anyhow::Result<Option<bool>> {
    self.store.update_date(
      date,
      |tasks| {
        match selector.resolve(tasks) {
          | Some(idx) => {
            let task = &mut tasks[idx];
            task.done = !task.done;
            (Some(task.done), true)
          }
          | None => (None, false)
        }
      }
    )
  }

  /// Removes a task; later tasks on the
  /// same date move up by one.
  #[instrument(skip(self))]
  pub fn delete(
    &mut self,
    date: NaiveDate,
    selector: TaskSelector
  ) -> anyhow::Result<Option<Task>> {
    let editing = self.editing;
    let removed = self.store.update_date(
      date,
      |tasks| {
        let Some(idx) =
          selector.resolve(tasks)
        else {
          return (None, false);
        };
        let open = editing
          .filter(|s| s.date == date)
          .and_then(|s| s.resolve(tasks));
        let task = tasks.remove(idx);

        // Re-anchor the session on the
        // ids this save persists.
        let session = match open {
          | Some(pos) if pos == idx => None,
          | Some(pos) => {
            let pos = if pos > idx {
              pos - 1
            } else {
              pos
            };
            Some(EditSession {
              date,
              id: tasks[pos].id,
              index: pos
            })
          }
          | None => editing
        };
        (Some((task, session)), true)
      }
    )?;

    let Some((task, session)) = removed
    else {
      return Ok(None);
    };
    if self.editing.is_some()
      && session.is_none()
    {
      debug!("deleted the task being edited");
    }
    self.editing = session;
    Ok(Some(task))
  }

  pub fn view(
    &self,
    criteria: &FilterCriteria,
    current: NaiveDate
  ) -> anyhow::Result<Vec<ViewEntry>> {
    let store = self.store.load_all()?;
    Ok(compute_view(
      &store, criteria, current
    ))
  }

  pub fn filter_options(
    &self
  ) -> anyhow::Result<FilterOptions> {
    let store = self.store.load_all()?;
    Ok(FilterOptions::collect(&store))
  }

  /// View, statistics of that view, and
  /// filter options from one read of the
  /// store.
  #[instrument(skip(self, criteria))]
  pub fn snapshot(
    &self,
    criteria: &FilterCriteria,
    current: NaiveDate
  ) -> anyhow::Result<Snapshot> {
    let store = self.store.load_all()?;
    let view = compute_view(
      &store, criteria, current
    );
    let stats = Stats::of_view(&view);
    let options =
      FilterOptions::collect(&store);
    debug!(
      total = stats.total,
      completed = stats.completed,
      "computed snapshot"
    );
    Ok(Snapshot {
      view,
      stats,
      options
    })
  }
}
