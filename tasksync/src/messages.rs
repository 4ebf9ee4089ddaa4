//! Events emitted by the local store.

use serde::{Deserialize, Serialize};

/// The kind of local write that produced a [`ChangeNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// Lightweight event broadcast after every committed local write.
///
/// Consumers that only need a "something changed" signal (list views, the
/// daemon's log) subscribe via [`LocalStore::change_rx`](crate::LocalStore::change_rx)
/// instead of diffing whole collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub local_id: String,
    pub kind: WriteKind,
    /// Seconds since the epoch, as written to the change record.
    pub at: i64,
}
