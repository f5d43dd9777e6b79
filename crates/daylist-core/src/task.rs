use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const DEFAULT_PROJECT: &str = "No Project";
pub const DEFAULT_ASSIGNEE: &str = "Unassigned";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Strict parse; accepts full names and `l`/`m`/`h`, case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Some(Self::Low),
            "medium" | "m" => Some(Self::Medium),
            "high" | "h" => Some(Self::High),
            _ => None,
        }
    }

    /// Anything missing or unrecognized becomes `Medium`.
    pub fn from_input(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    #[serde(default = "Uuid::new_v4", deserialize_with = "lenient_id")]
    pub id: Uuid,

    #[serde(default, deserialize_with = "lenient_text")]
    pub text: String,

    #[serde(default = "default_project", deserialize_with = "lenient_project")]
    pub project: String,

    #[serde(default = "default_assignee", deserialize_with = "lenient_assignee")]
    pub assignee: String,

    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: Priority,

    #[serde(default, deserialize_with = "lenient_done")]
    pub done: bool,

    #[serde(rename = "createdAt", default, deserialize_with = "lenient_created_at")]
    pub created_at: i64,
}

/// User-supplied field values for add and edit, before defaulting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub text: String,
    pub project: String,
    pub assignee: String,
    pub priority: Option<Priority>,
}

impl TaskDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = assignee.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    /// Seeds a draft from an existing task so an edit can change a subset of fields.
    pub fn from_task(task: &Task) -> Self {
        Self {
            text: task.text.clone(),
            project: task.project.clone(),
            assignee: task.assignee.clone(),
            priority: Some(task.priority),
        }
    }
}

impl Task {
    pub fn from_draft(draft: &TaskDraft, created_at: i64) -> Self {
        let mut task = Self {
            id: Uuid::new_v4(),
            text: String::new(),
            project: String::new(),
            assignee: String::new(),
            priority: Priority::default(),
            done: false,
            created_at,
        };
        task.apply_draft(draft);
        task
    }

    /// Overwrites the editable fields; `id`, `done` and `created_at` are kept.
    pub fn apply_draft(&mut self, draft: &TaskDraft) {
        self.text = draft.trimmed_text().to_string();
        self.project = normalize_project(&draft.project);
        self.assignee = normalize_assignee(&draft.assignee);
        self.priority = draft.priority.unwrap_or_default();
    }
}

pub fn normalize_project(raw: &str) -> String {
    or_default(raw, DEFAULT_PROJECT)
}

pub fn normalize_assignee(raw: &str) -> String {
    or_default(raw, DEFAULT_ASSIGNEE)
}

fn or_default(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

fn default_assignee() -> String {
    DEFAULT_ASSIGNEE.to_string()
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .unwrap_or_else(Uuid::new_v4))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// `null` and non-boolean values read as not done.
fn lenient_done<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.as_bool()).unwrap_or(false))
}

fn lenient_created_at<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|ms| ms as i64)))
        .unwrap_or(0))
}

fn lenient_project<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_project(raw.as_deref().unwrap_or_default()))
}

fn lenient_assignee<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_assignee(raw.as_deref().unwrap_or_default()))
}

fn lenient_priority<'de, D>(deserializer: D) -> Result<Priority, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(Priority::from_input(raw.as_ref().and_then(|v| v.as_str())))
}
