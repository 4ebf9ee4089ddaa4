//! Mapping between the local and remote ID spaces.
//!
//! There is no join table: the association is the `remote_id` column on the
//! local task. These functions only read the two collections and decide how a
//! remote task relates to the local replica.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::task::{RemoteTask, Task};

/// How a remote task relates to the local replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity<'a> {
    /// A local task already carries this remote id.
    Linked(&'a Task),
    /// No local task carries the remote id, but the local task named by the
    /// remote `browserId` has no remote id yet: its create reached the server
    /// and the answer never made it back.
    Unlinked(&'a Task),
    /// No local counterpart.
    New,
}

pub fn identify<'a>(remote: &RemoteTask, locals: &'a [Task]) -> Identity<'a> {
    if let Some(local) = locals.iter().find(|l| l.remote_id == Some(remote.remote_id)) {
        return Identity::Linked(local);
    }

    let adoptable = remote.browser_id.as_deref().and_then(|browser_id| {
        locals
            .iter()
            .find(|l| l.local_id == browser_id && l.remote_id.is_none())
    });
    match adoptable {
        Some(local) => Identity::Unlinked(local),
        None => Identity::New,
    }
}

/// Remote tasks with no local counterpart at all.
pub fn missing_locally<'a>(remotes: &'a [RemoteTask], locals: &[Task]) -> Vec<&'a RemoteTask> {
    remotes
        .iter()
        .filter(|r| identify(r, locals) == Identity::New)
        .collect()
}

/// Index remote tasks by their server identifier.
pub fn index_by_remote_id(remotes: &[RemoteTask]) -> HashMap<i64, &RemoteTask> {
    remotes.iter().map(|r| (r.remote_id, r)).collect()
}

/// Pick the local id for a remote task about to be inserted locally.
///
/// Reuses the remote `browserId` when no local task (and no id handed out
/// earlier in the same batch, tracked in `taken`) uses it; otherwise mints a
/// fresh UUID.
pub fn assign_local_id(remote: &RemoteTask, locals: &[Task], taken: &mut HashSet<String>) -> String {
    let candidate = remote
        .browser_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .filter(|id| !taken.contains(*id) && locals.iter().all(|l| l.local_id != *id));

    let local_id = match candidate {
        Some(id) => id.to_string(),
        None => Uuid::new_v4().to_string(),
    };
    taken.insert(local_id.clone());
    local_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Difficulty, Importance, Status};

    fn local(local_id: &str, remote_id: Option<i64>) -> Task {
        Task {
            local_id: local_id.into(),
            remote_id,
            name: format!("task {local_id}"),
            status: Status::Active,
            owner: "alice".into(),
            created: 1,
            last_modified: 1,
            difficulty: Difficulty::Normal,
            importance: Importance::Medium,
            deadline: None,
        }
    }

    fn remote(remote_id: i64, browser_id: Option<&str>) -> RemoteTask {
        RemoteTask {
            remote_id,
            browser_id: browser_id.map(str::to_string),
            name: format!("remote {remote_id}"),
            owner: "alice".into(),
            status: Status::Active,
            created: 1,
            last_modified: 1,
            difficulty: Difficulty::Normal,
            importance: Importance::Medium,
            deadline: None,
        }
    }

    #[test]
    fn test_match_by_remote_id() {
        let locals = vec![local("a", Some(7)), local("b", None)];
        assert_eq!(identify(&remote(7, None), &locals), Identity::Linked(&locals[0]));
        // remote id wins over a browser id pointing elsewhere
        assert_eq!(identify(&remote(7, Some("b")), &locals), Identity::Linked(&locals[0]));
    }

    #[test]
    fn test_unlinked_when_browser_id_matches_unsynced_task() {
        let locals = vec![local("a", None)];
        assert_eq!(identify(&remote(3, Some("a")), &locals), Identity::Unlinked(&locals[0]));
    }

    #[test]
    fn test_browser_id_of_linked_task_is_new() {
        // "a" already belongs to remote 7, so remote 8 claiming it is a different task.
        let locals = vec![local("a", Some(7))];
        assert_eq!(identify(&remote(8, Some("a")), &locals), Identity::New);
    }

    #[test]
    fn test_missing_locally() {
        let locals = vec![local("a", Some(1)), local("b", None)];
        let remotes = vec![remote(1, Some("a")), remote(2, Some("b")), remote(3, None), remote(4, Some("zzz"))];
        let missing: Vec<i64> = missing_locally(&remotes, &locals).iter().map(|r| r.remote_id).collect();
        assert_eq!(missing, vec![3, 4]);
    }

    #[test]
    fn test_assign_local_id_reuses_free_browser_id() {
        let locals = vec![local("a", Some(1))];
        let mut taken = HashSet::new();

        assert_eq!(assign_local_id(&remote(2, Some("b")), &locals, &mut taken), "b");

        let fresh = assign_local_id(&remote(3, Some("a")), &locals, &mut taken);
        assert_ne!(fresh, "a");
        assert!(Uuid::parse_str(&fresh).is_ok());

        // "b" was handed out earlier in the batch
        let again = assign_local_id(&remote(4, Some("b")), &locals, &mut taken);
        assert_ne!(again, "b");
    }

    #[test]
    fn test_index_by_remote_id() {
        let remotes = vec![remote(1, None), remote(5, None)];
        let index = index_by_remote_id(&remotes);
        assert_eq!(index.len(), 2);
        assert_eq!(index[&5].remote_id, 5);
    }
}
