use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use url::Url;

use crate::{HasHtmlUrl, DEFAULT_TICKTICK_HTML_URL};

pub mod filter;

/// TickTick priority levels.
/// TickTick uses: 0 = None, 1 = Low, 3 = Medium, 5 = High
#[derive(Serialize_repr, Deserialize_repr, PartialEq, Debug, Clone, Eq, Copy)]
#[repr(u8)]
pub enum TickTickPriority {
    None = 0,
    Low = 1,
    Medium = 3,
    High = 5,
}

impl TickTickPriority {
    /// Validate a raw priority level before it is ever sent over the wire.
    pub fn from_level(level: u8) -> Option<TickTickPriority> {
        match level {
            0 => Some(TickTickPriority::None),
            1 => Some(TickTickPriority::Low),
            3 => Some(TickTickPriority::Medium),
            5 => Some(TickTickPriority::High),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TickTickPriority::None => "None",
            TickTickPriority::Low => "Low",
            TickTickPriority::Medium => "Medium",
            TickTickPriority::High => "High",
        }
    }
}

/// TickTick task status: 0 = Normal (active), 2 = Completed
#[derive(Serialize_repr, Deserialize_repr, PartialEq, Debug, Clone, Eq, Copy)]
#[repr(u8)]
pub enum TickTickTaskStatus {
    Normal = 0,
    Completed = 2,
}

/// Checklist item status: 0 = Normal, 1 = Completed.
/// Unlike tasks, checklist items use 1 for completion.
#[derive(Serialize_repr, Deserialize_repr, PartialEq, Debug, Clone, Eq, Copy)]
#[repr(u8)]
pub enum TickTickSubtaskStatus {
    Normal = 0,
    Completed = 1,
}

impl Default for TickTickSubtaskStatus {
    fn default() -> Self {
        TickTickSubtaskStatus::Normal
    }
}

/// A checklist item owned by exactly one task.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TickTickSubtask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub status: TickTickSubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl TickTickSubtask {
    pub fn is_completed(&self) -> bool {
        self.status == TickTickSubtaskStatus::Completed
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TickTickTask {
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub all_day: Option<bool>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_zone: Option<String>,
    pub priority: TickTickPriority,
    pub status: TickTickTaskStatus,
    #[serde(default)]
    pub completed_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub items: Option<Vec<TickTickSubtask>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl TickTickTask {
    pub fn is_completed(&self) -> bool {
        self.status == TickTickTaskStatus::Completed
    }

    pub fn subtasks(&self) -> &[TickTickSubtask] {
        self.items.as_deref().unwrap_or_default()
    }
}

impl HasHtmlUrl for TickTickTask {
    fn get_html_url(&self) -> Url {
        format!(
            "{}#p/{}/tasks/{}",
            DEFAULT_TICKTICK_HTML_URL, self.project_id, self.id
        )
        .parse::<Url>()
        .unwrap()
    }
}
