//! Single-row "local store was touched" bookkeeping.
//!
//! The `sync_change_record` table holds at most one row recording when the
//! local replica was last mutated. The row is written by
//! [`LocalStore`](crate::LocalStore) inside the same transaction as the task
//! write, so a committed task change always has a matching record.
//!
//! The record is advisory: the reconciler uses it to report whether anything
//! changed locally between passes, never to decide whether to reconcile.

use sea_orm::{ConnectionTrait, DbErr, ExecResult, FromQueryResult, Statement};

/// Create the `sync_change_record` table if it does not already exist.
///
/// Called automatically by [`LocalStore::migrate`](crate::LocalStore::migrate).
pub async fn create_table(db: &impl ConnectionTrait) -> Result<ExecResult, DbErr> {
    db.execute_unprepared(
        "CREATE TABLE IF NOT EXISTS sync_change_record (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            changed_at INTEGER NOT NULL
        )",
    )
    .await
}

/// Upsert the record with `changed_at = at`.
///
/// Updates the existing row in place and only inserts when the table is empty,
/// so repeated mutations never append.
pub async fn touch(db: &impl ConnectionTrait, at: i64) -> Result<(), DbErr> {
    let updated = db
        .execute_raw(Statement::from_sql_and_values(
            sea_orm::DatabaseBackend::Sqlite,
            "UPDATE sync_change_record SET changed_at = $1",
            [sea_orm::Value::BigInt(Some(at))],
        ))
        .await?;

    if updated.rows_affected() == 0 {
        insert(db, at).await?;
    }
    Ok(())
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    n: i64,
}

#[derive(Debug, FromQueryResult)]
struct ChangedAtRow {
    changed_at: Option<i64>,
}

/// Number of rows in the table. Anything above one is an anomaly.
pub async fn record_count(db: &impl ConnectionTrait) -> Result<u64, DbErr> {
    let row = CountRow::find_by_statement(Statement::from_string(
        sea_orm::DatabaseBackend::Sqlite,
        "SELECT COUNT(*) AS n FROM sync_change_record",
    ))
    .one(db)
    .await?;

    Ok(row.map_or(0, |r| r.n.max(0) as u64))
}

/// Timestamp of the last recorded local mutation, if any.
///
/// With several rows present (see [`repair`]) the latest timestamp wins.
pub async fn last_change(db: &impl ConnectionTrait) -> Result<Option<i64>, DbErr> {
    let row = ChangedAtRow::find_by_statement(Statement::from_string(
        sea_orm::DatabaseBackend::Sqlite,
        "SELECT MAX(changed_at) AS changed_at FROM sync_change_record",
    ))
    .one(db)
    .await?;

    Ok(row.and_then(|r| r.changed_at))
}

/// Collapse a multi-row table back to a single record.
///
/// Returns `true` if a repair was needed. The surviving record keeps the
/// latest timestamp so no change is forgotten.
pub async fn repair(db: &impl ConnectionTrait) -> Result<bool, DbErr> {
    if record_count(db).await? <= 1 {
        return Ok(false);
    }

    let latest = last_change(db).await?;
    log::warn!("sync_change_record held more than one row; re-seeding");
    db.execute_unprepared("DELETE FROM sync_change_record").await?;
    if let Some(at) = latest {
        insert(db, at).await?;
    }
    Ok(true)
}

async fn insert(db: &impl ConnectionTrait, at: i64) -> Result<ExecResult, DbErr> {
    db.execute_raw(Statement::from_sql_and_values(
        sea_orm::DatabaseBackend::Sqlite,
        "INSERT INTO sync_change_record (changed_at) VALUES ($1)",
        [sea_orm::Value::BigInt(Some(at))],
    ))
    .await
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;

    use super::*;

    async fn memory_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.expect("Failed to open sqlite");
        create_table(&db).await.expect("Failed to create table");
        db
    }

    #[tokio::test]
    async fn test_touch_creates_record_lazily() {
        let db = memory_db().await;
        assert_eq!(record_count(&db).await.unwrap(), 0);
        assert_eq!(last_change(&db).await.unwrap(), None);

        touch(&db, 100).await.unwrap();
        assert_eq!(record_count(&db).await.unwrap(), 1);
        assert_eq!(last_change(&db).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_touch_updates_instead_of_appending() {
        let db = memory_db().await;
        for at in [100, 150, 200] {
            touch(&db, at).await.unwrap();
        }
        assert_eq!(record_count(&db).await.unwrap(), 1);
        assert_eq!(last_change(&db).await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_repair_collapses_duplicates() {
        let db = memory_db().await;
        insert(&db, 100).await.unwrap();
        insert(&db, 300).await.unwrap();
        insert(&db, 200).await.unwrap();

        assert!(repair(&db).await.unwrap());
        assert_eq!(record_count(&db).await.unwrap(), 1);
        assert_eq!(last_change(&db).await.unwrap(), Some(300));

        assert!(!repair(&db).await.unwrap());
    }
}
