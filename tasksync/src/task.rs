//! The task record in its two shapes.
//!
//! [`Task`] is the row held by the local replica (SeaORM entity `tasks`,
//! keyed by `local_id`). [`RemoteTask`] is the JSON shape served by the
//! remote API, keyed by the server-assigned `id`. The only link between the
//! two ID spaces is the `remote_id` column on the local row.

use std::time::{SystemTime, UNIX_EPOCH};

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod entity {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    use super::{Difficulty, Importance, Status};

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "tasks")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub local_id: String,
        #[sea_orm(unique)]
        pub remote_id: Option<i64>,
        pub name: String,
        pub status: Status,
        pub owner: String,
        pub created: i64,
        pub last_modified: i64,
        pub difficulty: Difficulty,
        pub importance: Importance,
        pub deadline: Option<i64>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// A task as stored in the local replica.
pub type Task = entity::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
}

impl Status {
    pub fn toggled(self) -> Self {
        match self {
            Status::Active => Status::Completed,
            Status::Completed => Status::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    #[sea_orm(string_value = "EASY")]
    Easy,
    #[default]
    #[sea_orm(string_value = "NORMAL")]
    Normal,
    #[sea_orm(string_value = "HARD")]
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Importance {
    #[sea_orm(string_value = "LOW")]
    Low,
    #[default]
    #[sea_orm(string_value = "MEDIUM")]
    Medium,
    #[sea_orm(string_value = "HIGH")]
    High,
}

/// A task as served by the remote API.
///
/// The server never stores a local id of its own; `browser_id` is whatever the
/// creating replica sent along and is only used as an adoption hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTask {
    #[serde(rename = "id")]
    pub remote_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_id: Option<String>,
    pub name: String,
    pub owner: String,
    pub status: Status,
    pub created: i64,
    pub last_modified: i64,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub deadline: Option<i64>,
}

impl RemoteTask {
    /// The remote view of a local task that was just created remotely under `remote_id`.
    pub fn from_local(task: &Task, remote_id: i64) -> Self {
        RemoteTask {
            remote_id,
            browser_id: Some(task.local_id.clone()),
            name: task.name.clone(),
            owner: task.owner.clone(),
            status: task.status,
            created: task.created,
            last_modified: task.last_modified,
            difficulty: task.difficulty,
            importance: task.importance,
            deadline: task.deadline,
        }
    }

    /// Translate into the local shape under the given local id.
    pub fn into_local(self, local_id: String) -> Task {
        Task {
            local_id,
            remote_id: Some(self.remote_id),
            name: self.name,
            status: self.status,
            owner: self.owner,
            created: self.created,
            last_modified: self.last_modified,
            difficulty: self.difficulty,
            importance: self.importance,
            deadline: self.deadline,
        }
    }
}

/// Body sent on create (`id` absent) and update (`id` set).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub browser_id: &'a str,
    pub name: &'a str,
    pub owner: &'a str,
    pub status: Status,
    pub created: i64,
    pub last_modified: i64,
    pub difficulty: Difficulty,
    pub importance: Importance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
}

impl<'a> From<&'a Task> for TaskPayload<'a> {
    fn from(task: &'a Task) -> Self {
        TaskPayload {
            id: task.remote_id,
            browser_id: &task.local_id,
            name: &task.name,
            owner: &task.owner,
            status: task.status,
            created: task.created,
            last_modified: task.last_modified,
            difficulty: task.difficulty,
            importance: task.importance,
            deadline: task.deadline,
        }
    }
}

/// Partial update applied by [`LocalStore::update_fields`](crate::LocalStore::update_fields).
///
/// Only the fields that are `Some` are written. `deadline` is doubly optional
/// so that a patch can clear it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub remote_id: Option<i64>,
    pub name: Option<String>,
    pub status: Option<Status>,
    pub last_modified: Option<i64>,
    pub difficulty: Option<Difficulty>,
    pub importance: Option<Importance>,
    pub deadline: Option<Option<i64>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    pub fn remote_id(remote_id: i64) -> Self {
        TaskPatch {
            remote_id: Some(remote_id),
            ..Default::default()
        }
    }

    /// All mutable fields of `remote`, used when the remote copy wins.
    pub fn from_remote(remote: &RemoteTask) -> Self {
        TaskPatch {
            remote_id: Some(remote.remote_id),
            name: Some(remote.name.clone()),
            status: Some(remote.status),
            last_modified: Some(remote.last_modified),
            difficulty: Some(remote.difficulty),
            importance: Some(remote.importance),
            deadline: Some(remote.deadline),
        }
    }
}

/// What the user types in to create a task. Everything else is assigned at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub difficulty: Difficulty,
    pub importance: Importance,
    pub deadline: Option<i64>,
}

impl NewTask {
    pub fn new(name: impl Into<String>) -> Self {
        NewTask {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_deadline(mut self, deadline: i64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Build the local record: fresh UUID, ACTIVE, no remote id, stamped `now`.
    pub fn into_task(self, owner: &str, now: i64) -> Task {
        Task {
            local_id: Uuid::new_v4().to_string(),
            remote_id: None,
            name: self.name,
            status: Status::Active,
            owner: owner.to_string(),
            created: now,
            last_modified: now,
            difficulty: self.difficulty,
            importance: self.importance,
            deadline: self.deadline,
        }
    }
}

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
