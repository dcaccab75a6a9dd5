use std::{
    fmt::{self, Display},
    str::FromStr,
};

use chrono::{Days, Local, NaiveDate, Weekday};

use super::{TickTickPriority, TickTickTask};

/// Named date bucket classifying a task by its due date relative to a
/// reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFilter {
    #[default]
    All,
    Today,
    Tomorrow,
    Overdue,
    ThisWeek,
    Next7Days,
}

pub static DATE_FILTER_VALUES: &[&str] =
    &["all", "today", "tomorrow", "overdue", "this_week", "next_7_days"];

impl FromStr for DateFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(DateFilter::All),
            "today" => Ok(DateFilter::Today),
            "tomorrow" => Ok(DateFilter::Tomorrow),
            "overdue" => Ok(DateFilter::Overdue),
            "this_week" => Ok(DateFilter::ThisWeek),
            "next_7_days" => Ok(DateFilter::Next7Days),
            _ => Err(format!(
                "unknown date filter `{s}`, expected one of {}",
                DATE_FILTER_VALUES.join(", ")
            )),
        }
    }
}

impl Display for DateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DateFilter::All => "all",
            DateFilter::Today => "today",
            DateFilter::Tomorrow => "tomorrow",
            DateFilter::Overdue => "overdue",
            DateFilter::ThisWeek => "this_week",
            DateFilter::Next7Days => "next_7_days",
        };
        write!(f, "{s}")
    }
}

/// A conjunction of optional task predicates. Omitted predicates match
/// every task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub date_filter: DateFilter,
    pub priority: Option<TickTickPriority>,
    pub search_term: Option<String>,
    pub project_id: Option<String>,
}

impl TaskFilter {
    /// Human-readable description of the active predicates, for response
    /// rendering.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.date_filter != DateFilter::All {
            parts.push(self.date_filter.to_string());
        }
        if let Some(priority) = self.priority {
            parts.push(format!("priority {}", priority.label()));
        }
        if let Some(search_term) = &self.search_term {
            parts.push(format!("matching '{search_term}'"));
        }
        if let Some(project_id) = &self.project_id {
            parts.push(format!("in project '{project_id}'"));
        }
        if parts.is_empty() {
            "all tasks".to_string()
        } else {
            parts.join(" and ")
        }
    }
}

/// Filter tasks against the current local date. Pure apart from reading
/// the clock; the result preserves the input ordering.
pub fn filter_tasks(tasks: &[TickTickTask], filter: &TaskFilter) -> Vec<TickTickTask> {
    filter_tasks_at(tasks, filter, Local::now().date_naive())
}

/// Filter tasks against an explicit reference date.
pub fn filter_tasks_at(
    tasks: &[TickTickTask],
    filter: &TaskFilter,
    today: NaiveDate,
) -> Vec<TickTickTask> {
    tasks
        .iter()
        .filter(|task| {
            matches_date(task, filter.date_filter, today)
                && matches_priority(task, filter.priority)
                && matches_search(task, filter.search_term.as_deref())
                && matches_project(task, filter.project_id.as_deref())
        })
        .cloned()
        .collect()
}

fn due_date_on(task: &TickTickTask) -> Option<NaiveDate> {
    task.due_date
        .map(|due| due.with_timezone(&Local).date_naive())
}

fn matches_date(task: &TickTickTask, date_filter: DateFilter, today: NaiveDate) -> bool {
    if date_filter == DateFilter::All {
        return true;
    }
    // Every other bucket requires a due date.
    let Some(due) = due_date_on(task) else {
        return false;
    };

    match date_filter {
        DateFilter::All => true,
        DateFilter::Today => due == today,
        DateFilter::Tomorrow => due == today + Days::new(1),
        DateFilter::Overdue => due < today && !task.is_completed(),
        DateFilter::ThisWeek => {
            let week = today.week(Weekday::Mon);
            week.first_day() <= due && due <= week.last_day()
        }
        DateFilter::Next7Days => today <= due && due <= today + Days::new(7),
    }
}

fn matches_priority(task: &TickTickTask, priority: Option<TickTickPriority>) -> bool {
    priority.is_none_or(|priority| task.priority == priority)
}

fn matches_search(task: &TickTickTask, search_term: Option<&str>) -> bool {
    let Some(search_term) = search_term else {
        return true;
    };
    let needle = search_term.to_lowercase();

    let contains = |text: Option<&str>| {
        text.is_some_and(|text| text.to_lowercase().contains(&needle))
    };

    contains(Some(&task.title))
        || contains(task.content.as_deref())
        || task.subtasks().iter().any(|subtask| {
            contains(Some(&subtask.title)) || contains(subtask.content.as_deref())
        })
}

fn matches_project(task: &TickTickTask, project_id: Option<&str>) -> bool {
    project_id.is_none_or(|project_id| task.project_id == project_id)
}
