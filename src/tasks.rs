//! Per-user task store with filtering, sorting and pagination.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_STATUS_ID: i64 = 1;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub emoji: Option<String>,
    pub category_id: Option<i64>,
    pub project_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub estimated_duration: Option<i64>,
    pub time_slot_id: Option<i64>,
    pub priority: Option<i64>,
    pub status_id: i64,
    pub is_overdue: bool,
    pub sub_tasks: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskCreate {
    pub title: String,
    pub description: Option<String>,
    pub emoji: Option<String>,
    pub category_id: Option<i64>,
    pub project_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub estimated_duration: Option<i64>,
    pub time_slot_id: Option<i64>,
    pub priority: Option<i64>,
    pub status_id: Option<i64>,
    pub sub_tasks: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub date: Option<String>,
    pub project_id: Option<String>,
    pub category_id: Option<i64>,
    pub status_id: Option<i64>,
    pub priority: Option<i64>,
    pub is_completed: Option<bool>,
    pub time_slot_id: Option<i64>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub total_items: usize,
    pub total_pages: usize,
    pub current_page: usize,
    pub limit: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    pub items: Vec<Task>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortKey { CreatedAt, UpdatedAt, Priority, Title, StartTime, EndTime }

impl SortKey {
    fn parse(s: Option<&str>) -> SortKey {
        match s.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("updated_at") => SortKey::UpdatedAt,
            Some("priority") => SortKey::Priority,
            Some("title") => SortKey::Title,
            Some("start_time") => SortKey::StartTime,
            Some("end_time") => SortKey::EndTime,
            // unknown columns fall back to creation time
            _ => SortKey::CreatedAt,
        }
    }

    fn compare(self, a: &Task, b: &Task) -> Ordering {
        match self {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::Priority => a.priority.cmp(&b.priority),
            SortKey::Title => a.title.cmp(&b.title),
            SortKey::StartTime => a.start_time.cmp(&b.start_time),
            SortKey::EndTime => a.end_time.cmp(&b.end_time),
        }
    }
}

/// Accepts RFC 3339 (`2025-01-02T09:00:00Z`) or a naive `YYYY-MM-DDTHH:MM:SS`
/// taken as UTC.
fn parse_timestamp(field: &str, raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    warn!(field, value = s, "ignoring unparseable timestamp");
    None
}

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskStore {
    pub fn new() -> Self { Self::default() }

    pub fn create_task(&self, user_id: i64, data: TaskCreate) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            user_id,
            title: data.title,
            description: data.description,
            emoji: data.emoji,
            category_id: data.category_id,
            project_id: data.project_id,
            start_time: data.start_time.as_deref().and_then(|s| parse_timestamp("start_time", s)),
            end_time: data.end_time.as_deref().and_then(|s| parse_timestamp("end_time", s)),
            estimated_duration: data.estimated_duration,
            time_slot_id: data.time_slot_id,
            priority: data.priority,
            status_id: data.status_id.unwrap_or(DEFAULT_STATUS_ID),
            is_overdue: false,
            sub_tasks: data.sub_tasks.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.tasks.write().insert(task.id.clone(), task.clone());
        info!(user_id, task_id = %task.id, "task created");
        task
    }

    /// Only returns tasks owned by `user_id`.
    pub fn get_task(&self, user_id: i64, task_id: &str) -> Option<Task> {
        self.tasks.read().get(task_id).filter(|t| t.user_id == user_id).cloned()
    }

    /// Marks a task completed now. Returns `None` for unknown or foreign tasks.
    pub fn complete_task(&self, user_id: i64, task_id: &str) -> Option<Task> {
        let mut g = self.tasks.write();
        let task = g.get_mut(task_id).filter(|t| t.user_id == user_id)?;
        let now = Utc::now();
        task.completed_at = Some(now);
        task.updated_at = now;
        Some(task.clone())
    }

    pub fn list_tasks(&self, user_id: i64, q: &TaskQuery) -> TaskList {
        let since = q.date.as_deref().and_then(|d| match NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d") {
            Ok(day) => day.and_hms_opt(0, 0, 0).map(|t| t.and_utc()),
            Err(_) => {
                warn!(date = d, "ignoring invalid date filter");
                None
            }
        });

        let mut rows: Vec<Task> = self
            .tasks
            .read()
            .values()
            .filter(|t| t.user_id == user_id)
            .filter(|t| q.category_id.is_none_or(|v| t.category_id == Some(v)))
            .filter(|t| q.status_id.is_none_or(|v| t.status_id == v))
            .filter(|t| q.priority.is_none_or(|v| t.priority == Some(v)))
            .filter(|t| q.project_id.as_ref().is_none_or(|v| t.project_id.as_ref() == Some(v)))
            .filter(|t| q.time_slot_id.is_none_or(|v| t.time_slot_id == Some(v)))
            .filter(|t| q.is_completed.is_none_or(|done| t.completed_at.is_some() == done))
            .filter(|t| match since {
                None => true,
                Some(since) => match (t.start_time, t.end_time) {
                    (None, None) => true,
                    (start, end) => start.is_some_and(|s| s >= since) || end.is_some_and(|e| e >= since),
                },
            })
            .cloned()
            .collect();

        let key = SortKey::parse(q.sort_by.as_deref());
        let ascending = q.order.as_deref().is_some_and(|o| o.eq_ignore_ascii_case("asc"));
        rows.sort_by(|a, b| {
            let ord = key.compare(a, b);
            if ascending { ord } else { ord.reverse() }
        });

        let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page = q.page.unwrap_or(1).max(1);
        let total_items = rows.len();
        let total_pages = total_items.div_ceil(limit);
        let offset = (page - 1).saturating_mul(limit);
        let items: Vec<Task> = rows.into_iter().skip(offset).take(limit).collect();

        TaskList {
            items,
            pagination: Pagination {
                total_items,
                total_pages,
                current_page: page,
                limit,
                has_next: page < total_pages,
                has_prev: page > 1,
            },
        }
    }
}
