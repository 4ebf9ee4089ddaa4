//! Last-Write-Wins (LWW) conflict resolution.
//!
//! A linked pair (local task, remote task) is compared on `last_modified`
//! alone. The later record replaces every mutable field of the earlier one as
//! a whole; there is no field-level merge. Equal timestamps keep the local
//! copy so that repeated passes never oscillate.

use crate::task::{RemoteTask, Task, TaskPatch};

/// Outcome of comparing a local task with its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Same timestamp: nothing to do.
    InSync,
    /// The local copy is newer; the remote one should be replaced.
    LocalWins,
    /// The remote copy is newer; apply the patch to the local task.
    RemoteWins(TaskPatch),
}

/// Returns `true` if the remote copy is strictly newer than the local one.
pub fn remote_wins(remote: &RemoteTask, local: &Task) -> bool {
    remote.last_modified > local.last_modified
}

/// Decide which side of a linked pair wins.
///
/// The patch for [`Resolution::RemoteWins`] carries every mutable field
/// (`name`, `status`, `difficulty`, `importance`, `deadline`,
/// `last_modified`). `local_id`, `owner` and `created` are never part of it,
/// and `remote_id` is only ever re-asserted, never cleared.
pub fn resolve(local: &Task, remote: &RemoteTask) -> Resolution {
    if remote_wins(remote, local) {
        Resolution::RemoteWins(TaskPatch::from_remote(remote))
    } else if local.last_modified > remote.last_modified {
        Resolution::LocalWins
    } else {
        Resolution::InSync
    }
}

/// Apply a resolution to the local task in memory, returning the merged record.
pub fn merged(local: &Task, remote: &RemoteTask) -> Task {
    match resolve(local, remote) {
        Resolution::RemoteWins(_) => Task {
            local_id: local.local_id.clone(),
            remote_id: local.remote_id.or(Some(remote.remote_id)),
            owner: local.owner.clone(),
            created: local.created,
            name: remote.name.clone(),
            status: remote.status,
            difficulty: remote.difficulty,
            importance: remote.importance,
            deadline: remote.deadline,
            last_modified: remote.last_modified,
        },
        Resolution::LocalWins | Resolution::InSync => local.clone(),
    }
}
