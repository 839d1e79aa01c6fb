use std::fmt::Display;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::cache::FileCache;
use crate::error::AppError;

pub const ROLE_ADMIN: i64 = 1;
pub const ROLE_MANAGER: i64 = 2;
pub const ROLE_USER: i64 = 3;

pub const STATUS_UNASSIGNED: i64 = 1;
pub const STATUS_ASSIGNED: i64 = 2;
pub const STATUS_CLOSED: i64 = 3;

pub const PRIORITY_LOW: i64 = 1;
pub const PRIORITY_URGENT: i64 = 4;

/// Username of the manager that inherits bugs owned by deleted users.
pub const DEFAULT_MANAGER_USERNAME: &str = "manager";

const MAX_NAME_LEN: usize = 255;
const MAX_SUMMARY_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 1000;

// === Entities ===

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role_id: i64,
    pub project_id: Option<i64>,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Bug {
    pub id: i64,
    pub project_id: i64,
    pub owner_id: i64,
    pub assigned_to_id: Option<i64>,
    pub status_id: i64,
    pub priority_id: i64,
    pub summary: String,
    pub description: String,
    pub fix_description: Option<String>,
    pub date_raised: NaiveDateTime,
    pub target_date: Option<NaiveDateTime>,
    pub date_closed: Option<NaiveDateTime>,
}

impl Bug {
    pub fn is_open(&self) -> bool {
        self.status_id != STATUS_CLOSED
    }

    pub fn is_overdue(&self, now: NaiveDateTime) -> bool {
        self.is_open() && self.target_date.is_some_and(|t| t < now)
    }

    pub fn is_unassigned(&self) -> bool {
        self.is_open() && self.assigned_to_id.is_none()
    }
}

// === Form and request payloads ===

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveUserForm {
    #[serde(rename = "userId", default, deserialize_with = "empty_as_none")]
    pub user_id: Option<i64>,
    pub username: String,
    #[serde(rename = "roleId")]
    pub role_id: i64,
    #[serde(rename = "projectId", default, deserialize_with = "empty_as_none")]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveProjectForm {
    #[serde(rename = "projectId", default, deserialize_with = "empty_as_none")]
    pub project_id: Option<i64>,
    #[serde(rename = "projectName")]
    pub project_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveBugForm {
    #[serde(rename = "bugId", default, deserialize_with = "empty_as_none")]
    pub bug_id: Option<i64>,
    #[serde(rename = "bugProjectId")]
    pub project_id: i64,
    pub summary: String,
    pub description: String,
    #[serde(rename = "assignedToId", default, deserialize_with = "empty_as_none")]
    pub assigned_to_id: Option<i64>,
    #[serde(rename = "statusId")]
    pub status_id: i64,
    #[serde(rename = "priorityId")]
    pub priority_id: i64,
    #[serde(rename = "targetDate", default)]
    pub target_date: Option<String>,
    #[serde(rename = "fixDescription", default)]
    pub fix_description: Option<String>,
}

impl SaveBugForm {
    pub fn validate(&self) -> Result<(), AppError> {
        let valid = self.project_id > 0
            && !self.summary.trim().is_empty()
            && self.summary.len() <= MAX_SUMMARY_LEN
            && !self.description.trim().is_empty()
            && self.description.len() <= MAX_DESCRIPTION_LEN
            && (STATUS_UNASSIGNED..=STATUS_CLOSED).contains(&self.status_id)
            && (PRIORITY_LOW..=PRIORITY_URGENT).contains(&self.priority_id);
        if valid {
            Ok(())
        } else {
            Err(AppError::Validation("Invalid input data".into()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    #[serde(rename = "userId")]
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBugRequest {
    #[serde(rename = "bugId")]
    pub bug_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserProjectRequest {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "projectId", default)]
    pub project_id: Option<i64>,
}

/// Form selects submit `""` for "none"; map that to `None` instead of a
/// deserialization error.
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    match opt.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(de::Error::custom),
    }
}

// === Date handling ===

/// Accepts the stored `YYYY-MM-DD HH:MM:SS` form or the bare `YYYY-MM-DD`
/// that date inputs submit.
pub fn parse_date(value: &str) -> Result<NaiveDateTime, AppError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| AppError::Validation("Invalid date format".into()))
}

pub fn parse_opt_date(value: Option<&str>) -> Result<Option<NaiveDateTime>, AppError> {
    match value {
        None | Some("") => Ok(None),
        Some(s) => parse_date(s).map(Some),
    }
}

/// Current time truncated to whole seconds, matching the stored
/// `YYYY-MM-DD HH:MM:SS` text form.
pub fn timestamp_now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

// === User queries ===

impl User {
    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM user_details ORDER BY id")
            .fetch_all(pool)
            .await?;
        Ok(users)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM user_details WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_username(
        pool: &SqlitePool,
        username: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM user_details WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn count_by_role(pool: &SqlitePool, role_id: i64) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_details WHERE role_id = ?")
                .bind(role_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    pub async fn count_all(pool: &SqlitePool) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_details")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn insert(
        pool: &SqlitePool,
        username: &str,
        role_id: i64,
        project_id: Option<i64>,
        password_hash: &str,
        name: &str,
    ) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO user_details (username, role_id, project_id, password, name) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(role_id)
        .bind(project_id)
        .bind(password_hash)
        .bind(name)
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        username: &str,
        role_id: i64,
        project_id: Option<i64>,
        name: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE user_details SET username = ?, role_id = ?, project_id = ?, name = ? \
             WHERE id = ?",
        )
        .bind(username)
        .bind(role_id)
        .bind(project_id)
        .bind(name)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_password(
        pool: &SqlitePool,
        id: i64,
        password_hash: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE user_details SET password = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_project(
        pool: &SqlitePool,
        id: i64,
        project_id: Option<i64>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE user_details SET project_id = ? WHERE id = ?")
            .bind(project_id)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM user_details WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// === Project queries ===

impl Project {
    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Project>, AppError> {
        let projects = sqlx::query_as::<_, Project>("SELECT * FROM project ORDER BY id")
            .fetch_all(pool)
            .await?;
        Ok(projects)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Project>, AppError> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM project WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(project)
    }

    pub async fn insert(pool: &SqlitePool, name: &str) -> Result<i64, AppError> {
        let result = sqlx::query("INSERT INTO project (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(pool: &SqlitePool, id: i64, name: &str) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE project SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// === Bug queries ===

fn bug_cache_key(id: i64) -> String {
    format!("bug_{id}")
}

impl Bug {
    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Bug>, AppError> {
        let bugs = sqlx::query_as::<_, Bug>("SELECT * FROM bugs ORDER BY id")
            .fetch_all(pool)
            .await?;
        Ok(bugs)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Bug>, AppError> {
        let bug = sqlx::query_as::<_, Bug>("SELECT * FROM bugs WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(bug)
    }

    /// Read-through variant of [`Bug::find_by_id`]: hits the file cache
    /// first, fills it on a miss. Writers invalidate with
    /// [`Bug::invalidate_cache`].
    pub async fn find_by_id_cached(
        pool: &SqlitePool,
        cache: &FileCache,
        id: i64,
    ) -> Result<Option<Bug>, AppError> {
        let key = bug_cache_key(id);
        if let Some(bug) = cache.get::<Bug>(&key) {
            return Ok(Some(bug));
        }
        let bug = Self::find_by_id(pool, id).await?;
        if let Some(ref bug) = bug {
            if let Err(e) = cache.set(&key, bug, None) {
                log::warn!("Failed to cache bug {id}: {e}");
            }
        }
        Ok(bug)
    }

    pub fn invalidate_cache(cache: &FileCache, id: i64) {
        cache.delete(&bug_cache_key(id));
    }

    pub async fn find_by_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<Bug>, AppError> {
        let bugs = sqlx::query_as::<_, Bug>("SELECT * FROM bugs WHERE project_id = ? ORDER BY id")
            .bind(project_id)
            .fetch_all(pool)
            .await?;
        Ok(bugs)
    }

    /// Inserts `bug` (its `id` is ignored) and returns the new row id.
    pub async fn insert(pool: &SqlitePool, bug: &Bug) -> Result<i64, AppError> {
        let result = sqlx::query(
            "INSERT INTO bugs (project_id, owner_id, assigned_to_id, status_id, priority_id, \
             summary, description, fix_description, date_raised, target_date, date_closed) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bug.project_id)
        .bind(bug.owner_id)
        .bind(bug.assigned_to_id)
        .bind(bug.status_id)
        .bind(bug.priority_id)
        .bind(&bug.summary)
        .bind(&bug.description)
        .bind(&bug.fix_description)
        .bind(bug.date_raised)
        .bind(bug.target_date)
        .bind(bug.date_closed)
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(pool: &SqlitePool, bug: &Bug) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE bugs SET project_id = ?, owner_id = ?, assigned_to_id = ?, status_id = ?, \
             priority_id = ?, summary = ?, description = ?, fix_description = ?, \
             date_raised = ?, target_date = ?, date_closed = ? WHERE id = ?",
        )
        .bind(bug.project_id)
        .bind(bug.owner_id)
        .bind(bug.assigned_to_id)
        .bind(bug.status_id)
        .bind(bug.priority_id)
        .bind(&bug.summary)
        .bind(&bug.description)
        .bind(&bug.fix_description)
        .bind(bug.date_raised)
        .bind(bug.target_date)
        .bind(bug.date_closed)
        .bind(bug.id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM bugs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Clears the assignee from every bug held by `user_id` and drops the
    /// bugs back to Unassigned. Runs before a user is deleted. Each touched
    /// bug is evicted from the cache so stale assignees never survive the
    /// delete.
    pub async fn unassign_user(
        pool: &SqlitePool,
        cache: &FileCache,
        user_id: i64,
    ) -> Result<u64, AppError> {
        let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM bugs WHERE assigned_to_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
        let result = sqlx::query(
            "UPDATE bugs SET assigned_to_id = NULL, status_id = ? WHERE assigned_to_id = ?",
        )
        .bind(STATUS_UNASSIGNED)
        .bind(user_id)
        .execute(pool)
        .await?;
        for (id,) in ids {
            Self::invalidate_cache(cache, id);
        }
        Ok(result.rows_affected())
    }

    /// Hands bugs owned by `user_id` to the default manager, evicting each
    /// touched bug from the cache. Returns false (leaving ownership
    /// untouched) when no such manager exists.
    pub async fn reassign_owned_to_manager(
        pool: &SqlitePool,
        cache: &FileCache,
        user_id: i64,
    ) -> Result<bool, AppError> {
        let manager = sqlx::query_as::<_, User>(
            "SELECT * FROM user_details WHERE username = ? AND role_id = ? LIMIT 1",
        )
        .bind(DEFAULT_MANAGER_USERNAME)
        .bind(ROLE_MANAGER)
        .fetch_optional(pool)
        .await?;

        let Some(manager) = manager else {
            log::warn!(
                "No manager found with username '{DEFAULT_MANAGER_USERNAME}'. \
                 Bugs will remain owned by deleted user {user_id}"
            );
            return Ok(false);
        };

        let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM bugs WHERE owner_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
        sqlx::query("UPDATE bugs SET owner_id = ? WHERE owner_id = ?")
            .bind(manager.id)
            .bind(user_id)
            .execute(pool)
            .await?;
        for (id,) in ids {
            Self::invalidate_cache(cache, id);
        }
        Ok(true)
    }
}

// === User form validation ===

impl SaveUserForm {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(ROLE_ADMIN..=ROLE_USER).contains(&self.role_id) {
            return Err(AppError::Validation("Invalid role ID".into()));
        }
        if self.username.trim().is_empty() || self.name.trim().is_empty() {
            return Err(AppError::Validation("Username and Name are required".into()));
        }
        if self.username.len() > MAX_NAME_LEN || self.name.len() > MAX_NAME_LEN {
            return Err(AppError::Validation(
                "Username and Name must be less than 255 characters".into(),
            ));
        }
        Ok(())
    }
}

impl SaveProjectForm {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.project_name.trim().is_empty() || self.project_name.len() > MAX_NAME_LEN {
            return Err(AppError::Validation(
                "Project name must not be empty and must be less than 255 characters".into(),
            ));
        }
        Ok(())
    }
}
