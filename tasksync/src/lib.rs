//! # tasksync
//!
//! Offline-first reconciliation between a local SQLite replica of a personal
//! task list and a remote HTTP task service.
//!
//! Every user action lands in the local store first (SeaORM over SQLite) and
//! is then propagated to the remote API on a best-effort basis. A periodic
//! pass repairs whatever propagation missed: tasks never created remotely,
//! remote tasks missing locally, and diverged copies, which are settled with
//! Last-Write-Wins (LWW) on `last_modified`.
//!
//! ## Quick start
//!
//! ```ignore
//! use tasksync::{NewTask, TaskSyncBuilder};
//!
//! let sync = TaskSyncBuilder::new("sqlite:./tasks.db?mode=rwc", remote_url, "alice")
//!     .with_probe(true)
//!     .with_background_sync(true)
//!     .build()
//!     .await?;
//!
//! let task = sync.reconciler().add_task(NewTask::new("buy milk")).await?;
//! sync.reconciler().toggle_status(&task.local_id).await?;
//! ```
//!
//! ## Key types
//!
//! - [`Reconciler`]: user actions, propagation and the periodic pass
//! - [`LocalStore`]: the local replica and its change record
//! - [`RemoteStore`] / [`HttpRemoteStore`]: the remote API
//! - [`ConnectivityMonitor`]: the process-wide online flag
//! - [`TaskSyncBuilder`]: wires everything together from a [`SyncConfig`]

pub mod builder;
pub mod change_tracker;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod error;
pub mod identity;
pub mod local_store;
pub mod messages;
pub mod reconciler;
pub mod remote;
pub mod task;

pub use builder::{TaskSync, TaskSyncBuilder};
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, ReachabilityProbe};
pub use error::{ConfigError, SyncError, SyncResult};
pub use local_store::LocalStore;
pub use messages::{ChangeNotification, WriteKind};
pub use reconciler::{PassReport, Reconciler};
pub use remote::{HttpRemoteStore, RemoteStore};
pub use task::{Difficulty, Importance, NewTask, RemoteTask, Status, Task, TaskPatch};

// Re-export sea-orm for users of the library
pub use sea_orm;
