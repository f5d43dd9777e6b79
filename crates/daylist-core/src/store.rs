use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::datetime::{format_date_key, parse_date_key};
use crate::task::{Priority, Task, TaskDraft};

/// Key of the single persisted entry holding every task.
pub const TASKS_KEY: &str = "tasksByDate";

/// Every task, keyed by local calendar day. A key never maps to an empty list.
pub type Store = BTreeMap<NaiveDate, Vec<Task>>;

/// Synchronous get/set-by-key persistence backend.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug)]
pub struct DirKvStore {
    pub data_dir: PathBuf,
}

impl DirKvStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        info!(data_dir = %data_dir.display(), "opened key-value directory");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl KvStore for DirKvStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(file = %path.display(), "no value stored for key");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        debug!(file = %path.display(), "writing value atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }
}

/// In-process backend with an optional byte quota over the sum of stored values.
#[derive(Debug, Default, Clone)]
pub struct MemoryKvStore {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota: Some(quota),
        }
    }

    pub fn insert_raw(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if let Some(quota) = self.quota {
            let others: usize = self
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let needed = others + value.len();
            if needed > quota {
                return Err(anyhow!(
                    "storage quota exceeded: {needed} bytes needed, {quota} available"
                ));
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The seed written on first open of an empty store.
pub fn welcome_task(created_at: i64) -> Task {
    Task::from_draft(
        &TaskDraft::new("Welcome to Daily Task Manager!")
            .project("Getting Started")
            .assignee("You")
            .priority(Priority::Medium),
        created_at,
    )
}

/// Whole-collection adapter over a [`KvStore`]: every write is load-all, modify, save-all.
#[derive(Debug)]
pub struct TaskStore<K: KvStore> {
    kv: K,
}

impl<K: KvStore> TaskStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn into_inner(self) -> K {
        self.kv
    }

    /// Corrupt or unparsable data reads as an empty store. Only a failing backend is an error.
    #[tracing::instrument(skip(self))]
    pub fn load_all(&self) -> anyhow::Result<Store> {
        let Some(raw) = self
            .kv
            .get(TASKS_KEY)
            .with_context(|| format!("failed to read {TASKS_KEY}"))?
        else {
            return Ok(Store::new());
        };
        Self::decode(&raw)
    }

    fn decode(raw: &str) -> anyhow::Result<Store> {
        if raw.trim().is_empty() {
            return Ok(Store::new());
        }

        let parsed: Option<BTreeMap<String, serde_json::Value>> =
            match serde_json::from_str(raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(error = %err, "stored tasks are corrupt; starting from an empty store");
                    return Ok(Store::new());
                }
            };

        let mut store = Store::new();
        for (key, value) in parsed.unwrap_or_default() {
            let Some(date) = parse_date_key(&key) else {
                warn!(key = %key, "skipping stored entry with a non-date key");
                continue;
            };
            let serde_json::Value::Array(records) = value else {
                warn!(key = %key, "skipping stored date whose value is not a list");
                continue;
            };

            let tasks: Vec<Task> = records
                .into_iter()
                .enumerate()
                .filter_map(|(index, record)| match serde_json::from_value(record) {
                    Ok(task) => Some(task),
                    Err(err) => {
                        warn!(key = %key, index, error = %err, "skipping unreadable stored task");
                        None
                    }
                })
                .collect();
            if !tasks.is_empty() {
                store.insert(date, tasks);
            }
        }

        debug!(dates = store.len(), "loaded store");
        Ok(store)
    }

    #[tracing::instrument(skip(self, store), fields(dates = store.len()))]
    pub fn save_all(&mut self, store: &Store) -> anyhow::Result<()> {
        let encoded: BTreeMap<String, &Vec<Task>> = store
            .iter()
            .filter(|(_, tasks)| !tasks.is_empty())
            .map(|(date, tasks)| (format_date_key(*date), tasks))
            .collect();
        let payload = serde_json::to_string(&encoded)?;
        self.kv
            .set(TASKS_KEY, &payload)
            .with_context(|| format!("failed to save {TASKS_KEY}"))
    }

    pub fn tasks_for(&self, date: NaiveDate) -> anyhow::Result<Vec<Task>> {
        Ok(self.load_all()?.remove(&date).unwrap_or_default())
    }

    /// Replaces one date's list; an empty list removes the date.
    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn set_tasks_for(&mut self, date: NaiveDate, tasks: Vec<Task>) -> anyhow::Result<()> {
        let mut store = self.load_all()?;
        if tasks.is_empty() {
            store.remove(&date);
        } else {
            store.insert(date, tasks);
        }
        self.save_all(&store)
    }

    /// Read-modify-write of one date. `apply` returns the result and whether
    /// anything changed; unchanged lists are not written back.
    #[tracing::instrument(skip(self, apply))]
    pub fn update_date<T, F>(&mut self, date: NaiveDate, apply: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut Vec<Task>) -> (T, bool),
    {
        let mut store = self.load_all()?;
        let mut tasks = store.remove(&date).unwrap_or_default();
        let (out, changed) = apply(&mut tasks);
        if !changed {
            debug!("date unchanged; skipping save");
            return Ok(out);
        }
        if !tasks.is_empty() {
            store.insert(date, tasks);
        }
        self.save_all(&store)?;
        Ok(out)
    }

    /// Writes the welcome task on `today` when nothing has been stored yet.
    #[tracing::instrument(skip(self, created_at))]
    pub fn seed_if_empty(&mut self, today: NaiveDate, created_at: i64) -> anyhow::Result<bool> {
        if !self.load_all()?.is_empty() {
            return Ok(false);
        }
        info!(date = %today, "seeding empty store with welcome task");
        self.set_tasks_for(today, vec![welcome_task(created_at)])?;
        Ok(true)
    }
}
