use sea_orm::{
    sea_query::SqliteQueryBuilder, ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait,
    Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Schema, Set,
    TransactionTrait,
};
use tokio::sync::broadcast;

use crate::change_tracker;
use crate::error::{SyncError, SyncResult};
use crate::messages::{ChangeNotification, WriteKind};
use crate::task::{entity, unix_now, Task, TaskPatch};

/// The local replica: a SQLite `tasks` table keyed by `local_id`.
///
/// Every insert, update and delete writes the task row and the change record
/// in one transaction, then broadcasts a [`ChangeNotification`] once the
/// transaction has committed.
pub struct LocalStore {
    inner: DatabaseConnection,
    change_tx: broadcast::Sender<ChangeNotification>,
}

impl LocalStore {
    /// Open `url` and create the schema if it does not exist yet.
    pub async fn connect(url: &str) -> Result<Self, DbErr> {
        let mut opts = ConnectOptions::new(url);
        opts.sqlx_logging(false);
        let inner = Database::connect(opts).await?;
        let store = Self::new(inner);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing connection. Call [`migrate`](Self::migrate) before use.
    pub fn new(inner: DatabaseConnection) -> Self {
        let (change_tx, _) = broadcast::channel::<ChangeNotification>(256);
        Self { inner, change_tx }
    }

    /// Create the `tasks` table, its `owner` index and the change-record table.
    pub async fn migrate(&self) -> Result<(), DbErr> {
        let backend = self.inner.get_database_backend();
        let schema = Schema::new(backend);
        let create_stmt = schema
            .create_table_from_entity(entity::Entity)
            .if_not_exists()
            .to_owned();
        self.inner
            .execute_unprepared(&create_stmt.to_string(SqliteQueryBuilder))
            .await?;
        self.inner
            .execute_unprepared("CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks (owner)")
            .await?;
        change_tracker::create_table(&self.inner).await?;
        Ok(())
    }

    /// Get a reference to the underlying SeaORM connection.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    /// Get a handle to the change notification broadcast channel.
    pub fn change_rx(&self) -> broadcast::Receiver<ChangeNotification> {
        self.change_tx.subscribe()
    }

    /// Persist a new task. The caller supplies `local_id`.
    ///
    /// Fails with [`SyncError::Storage`] on a constraint violation (duplicate
    /// `local_id` or `remote_id`).
    pub async fn insert(&self, task: Task) -> SyncResult<String> {
        let at = unix_now();
        let txn = self.inner.begin().await?;
        let inserted = into_active(task).insert(&txn).await?;
        change_tracker::touch(&txn, at).await?;
        txn.commit().await?;

        log::debug!("Inserted task {} into the local store", inserted.local_id);
        self.notify(&inserted.local_id, WriteKind::Insert, at);
        Ok(inserted.local_id)
    }

    /// Merge the fields named in `patch` into an existing task.
    ///
    /// `last_modified` is never lowered and a `remote_id` that is already set is
    /// never replaced, so a stale patch cannot move a task backwards.
    pub async fn update_fields(&self, local_id: &str, patch: TaskPatch) -> SyncResult<Task> {
        let at = unix_now();
        let txn = self.inner.begin().await?;
        let existing = entity::Entity::find_by_id(local_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| SyncError::NotFound(local_id.to_string()))?;

        if patch.is_empty() {
            return Ok(existing);
        }

        let mut active: entity::ActiveModel = existing.clone().into();
        if let Some(remote_id) = patch.remote_id {
            match existing.remote_id {
                None => active.remote_id = Set(Some(remote_id)),
                Some(current) if current != remote_id => log::warn!(
                    "Task {local_id} is already linked to remote {current}; ignoring remote id {remote_id}"
                ),
                Some(_) => {}
            }
        }
        if let Some(name) = patch.name {
            active.name = Set(name);
        }
        if let Some(status) = patch.status {
            active.status = Set(status);
        }
        if let Some(difficulty) = patch.difficulty {
            active.difficulty = Set(difficulty);
        }
        if let Some(importance) = patch.importance {
            active.importance = Set(importance);
        }
        if let Some(deadline) = patch.deadline {
            active.deadline = Set(deadline);
        }
        if let Some(last_modified) = patch.last_modified {
            active.last_modified = Set(last_modified.max(existing.last_modified));
        }

        if !active.is_changed() {
            return Ok(existing);
        }

        let updated = active.update(&txn).await?;
        change_tracker::touch(&txn, at).await?;
        txn.commit().await?;

        self.notify(local_id, WriteKind::Update, at);
        Ok(updated)
    }

    /// Delete a task. Deleting an absent id is not an error.
    ///
    /// Returns the removed task so callers can propagate the delete.
    pub async fn delete_by_id(&self, local_id: &str) -> SyncResult<Option<Task>> {
        let at = unix_now();
        let txn = self.inner.begin().await?;
        let Some(existing) = entity::Entity::find_by_id(local_id.to_string())
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(None);
        };

        entity::Entity::delete_by_id(local_id.to_string())
            .exec(&txn)
            .await?;
        change_tracker::touch(&txn, at).await?;
        txn.commit().await?;

        self.notify(local_id, WriteKind::Delete, at);
        Ok(Some(existing))
    }

    pub async fn get_by_id(&self, local_id: &str) -> SyncResult<Option<Task>> {
        Ok(entity::Entity::find_by_id(local_id.to_string())
            .one(&self.inner)
            .await?)
    }

    pub async fn list_all(&self) -> SyncResult<Vec<Task>> {
        Ok(entity::Entity::find()
            .order_by_asc(entity::Column::Created)
            .all(&self.inner)
            .await?)
    }

    pub async fn list_by_owner(&self, owner: &str) -> SyncResult<Vec<Task>> {
        Ok(entity::Entity::find()
            .filter(entity::Column::Owner.eq(owner))
            .order_by_asc(entity::Column::Created)
            .all(&self.inner)
            .await?)
    }

    /// Timestamp of the last committed local mutation, if any.
    pub async fn last_change(&self) -> SyncResult<Option<i64>> {
        Ok(change_tracker::last_change(&self.inner).await?)
    }

    /// Collapse a corrupted multi-row change record. See [`change_tracker::repair`].
    pub async fn repair_change_record(&self) -> SyncResult<bool> {
        let txn = self.inner.begin().await?;
        let repaired = change_tracker::repair(&txn).await?;
        txn.commit().await?;
        Ok(repaired)
    }

    fn notify(&self, local_id: &str, kind: WriteKind, at: i64) {
        // No subscribers is fine.
        let _ = self.change_tx.send(ChangeNotification {
            local_id: local_id.to_string(),
            kind,
            at,
        });
    }
}

fn into_active(task: Task) -> entity::ActiveModel {
    entity::ActiveModel {
        local_id: Set(task.local_id),
        remote_id: Set(task.remote_id),
        name: Set(task.name),
        status: Set(task.status),
        owner: Set(task.owner),
        created: Set(task.created),
        last_modified: Set(task.last_modified),
        difficulty: Set(task.difficulty),
        importance: Set(task.importance),
        deadline: Set(task.deadline),
    }
}
