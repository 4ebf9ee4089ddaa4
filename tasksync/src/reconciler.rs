//! The reconciliation engine.
//!
//! Local writes always land first. Remote propagation is best effort: a
//! failed create leaves the task without a `remote_id`, a failed edit leaves
//! the remote copy stale, and the periodic pass repairs both. User actions
//! never fail because of the remote side.
//!
//! A pass runs in this order:
//!
//! 1. skip when offline,
//! 2. repair the change record,
//! 3. fetch both collections for the owner,
//! 4. adopt remote tasks whose create response was lost,
//! 5. retry creates for local tasks without a `remote_id`,
//! 6. pull remote tasks missing locally when the counts differ,
//! 7. resolve every linked pair with last-write-wins.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::select;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::conflict::{self, Resolution};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::identity::{self, Identity};
use crate::local_store::LocalStore;
use crate::remote::RemoteStore;
use crate::task::{NewTask, RemoteTask, Status, Task, TaskPatch, unix_now};

/// Default period between two passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// What a single pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Unlinked local tasks that adopted their remote id.
    pub linked: usize,
    /// Local tasks created remotely by the retry step.
    pub created: usize,
    /// Remote tasks inserted locally by drift repair.
    pub pulled: usize,
    /// Local tasks overwritten by a newer remote copy.
    pub overwritten: usize,
    /// Remote tasks replaced by a newer local copy.
    pub pushed: usize,
    /// Surplus remote copies of an already linked task that were deleted.
    pub duplicates_removed: usize,
    /// Per-task steps that failed and were skipped.
    pub failed: usize,
    /// Whether the local store was written since the previous pass.
    pub local_changed: bool,
    /// Whether a multi-row change record had to be collapsed.
    pub change_record_repaired: bool,
}

impl PassReport {
    /// `true` if the pass wrote to neither store.
    pub fn is_noop(&self) -> bool {
        self.linked
            + self.created
            + self.pulled
            + self.overwritten
            + self.pushed
            + self.duplicates_removed
            == 0
            && !self.change_record_repaired
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "linked={} created={} pulled={} overwritten={} pushed={} duplicates_removed={} failed={} local_changed={}",
            self.linked,
            self.created,
            self.pulled,
            self.overwritten,
            self.pushed,
            self.duplicates_removed,
            self.failed,
            self.local_changed
        )
    }
}

/// Clears the in-flight flag when the pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<ConnectivityMonitor>,
    owner: String,
    interval: Duration,
    sync_on_reconnect: bool,
    in_flight: AtomicBool,
    last_seen_change: Mutex<Option<i64>>,
}

impl Reconciler {
    pub fn new(
        local: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<ConnectivityMonitor>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
            owner: owner.into(),
            interval: DEFAULT_INTERVAL,
            sync_on_reconnect: true,
            in_flight: AtomicBool::new(false),
            last_seen_change: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run a pass as soon as connectivity comes back instead of waiting for the timer.
    pub fn with_sync_on_reconnect(mut self, enabled: bool) -> Self {
        self.sync_on_reconnect = enabled;
        self
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_reconciling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    // --- User actions ---

    /// Create a task locally, then try to create it remotely.
    ///
    /// Returns the task as stored once propagation has been attempted, so
    /// `remote_id` is set when the remote create succeeded.
    pub async fn add_task(&self, new: NewTask) -> SyncResult<Task> {
        let task = new.into_task(&self.owner, unix_now());
        let local_id = self.local.insert(task).await?;
        log::info!("Added task {local_id}");

        best_effort("create", &local_id, self.propagate_create(&local_id).await);

        self.local
            .get_by_id(&local_id)
            .await?
            .ok_or(SyncError::NotFound(local_id))
    }

    pub async fn rename_task(&self, local_id: &str, name: impl Into<String>) -> SyncResult<Task> {
        let patch = TaskPatch {
            name: Some(name.into()),
            ..Default::default()
        };
        self.edit(local_id, patch).await
    }

    pub async fn set_status(&self, local_id: &str, status: Status) -> SyncResult<Task> {
        let patch = TaskPatch {
            status: Some(status),
            ..Default::default()
        };
        self.edit(local_id, patch).await
    }

    /// Flip ACTIVE and COMPLETED.
    pub async fn toggle_status(&self, local_id: &str) -> SyncResult<Task> {
        let task = self
            .local
            .get_by_id(local_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(local_id.to_string()))?;
        self.set_status(local_id, task.status.toggled()).await
    }

    /// Delete locally, then remotely if the task was ever replicated.
    ///
    /// Deleting an unknown id is a no-op and returns `None`.
    pub async fn delete_task(&self, local_id: &str) -> SyncResult<Option<Task>> {
        let removed = self.local.delete_by_id(local_id).await?;
        if let Some(task) = &removed {
            log::info!("Deleted task {local_id}");
            best_effort("delete", local_id, self.propagate_delete(task).await);
        }
        Ok(removed)
    }

    pub async fn list_tasks(&self) -> SyncResult<Vec<Task>> {
        self.local.list_by_owner(&self.owner).await
    }

    async fn edit(&self, local_id: &str, mut patch: TaskPatch) -> SyncResult<Task> {
        patch.last_modified = Some(unix_now());
        let task = self.local.update_fields(local_id, patch).await?;
        best_effort("edit", local_id, self.propagate_edit(&task).await);
        Ok(task)
    }

    // --- Propagation ---

    /// Create the task remotely unless it already has a `remote_id`.
    ///
    /// The task is re-read first so that two concurrent triggers for the same
    /// task cannot both create it. Returns the remote id the task ends up
    /// with, or `None` if it no longer exists locally.
    pub async fn propagate_create(&self, local_id: &str) -> SyncResult<Option<i64>> {
        let Some(task) = self.local.get_by_id(local_id).await? else {
            return Ok(None);
        };
        if let Some(remote_id) = task.remote_id {
            log::debug!("Task {local_id} already linked to remote {remote_id}");
            return Ok(Some(remote_id));
        }

        let remote_id = self.remote.create(&task).await?;
        match self
            .local
            .update_fields(local_id, TaskPatch::remote_id(remote_id))
            .await
        {
            Ok(updated) if updated.remote_id == Some(remote_id) => {
                log::debug!("Linked task {local_id} to remote {remote_id}");
                Ok(Some(remote_id))
            }
            Ok(updated) => {
                // A concurrent create linked the task first; this copy is surplus.
                log::info!(
                    "Task {local_id} was linked to remote {:?} during create; removing remote {remote_id}",
                    updated.remote_id
                );
                self.remote.delete_by_id(remote_id).await?;
                Ok(updated.remote_id)
            }
            Err(SyncError::NotFound(_)) => {
                // Deleted locally while the create was in flight.
                log::debug!("Task {local_id} vanished during create; removing remote {remote_id}");
                self.remote.delete_by_id(remote_id).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Push an edited task. Tasks not yet created remotely are skipped: the
    /// pending create carries the new fields.
    pub async fn propagate_edit(&self, task: &Task) -> SyncResult<()> {
        if task.remote_id.is_none() {
            log::debug!("Task {} not yet created remotely; edit rides on the create", task.local_id);
            return Ok(());
        }
        self.remote.update(task).await
    }

    /// Remove a locally deleted task from the remote store. A failure leaves a
    /// remote orphan.
    pub async fn propagate_delete(&self, task: &Task) -> SyncResult<()> {
        match task.remote_id {
            Some(remote_id) => self.remote.delete_by_id(remote_id).await,
            None => Ok(()),
        }
    }

    // --- Periodic pass ---

    /// Run one reconciliation pass for the owner.
    ///
    /// Returns `Ok(None)` without touching either store when offline or when
    /// another pass is already running. Fails as a whole only if the local
    /// store fails outside a per-task step or if either collection cannot be
    /// fetched.
    pub async fn reconcile(&self) -> SyncResult<Option<PassReport>> {
        if !self.connectivity.is_online() {
            log::debug!("Offline; skipping reconciliation");
            return Ok(None);
        }
        let Some(_guard) = PassGuard::acquire(&self.in_flight) else {
            log::debug!("Reconciliation already in progress");
            return Ok(None);
        };

        let mut report = PassReport::default();
        report.change_record_repaired = self.local.repair_change_record().await?;

        let current_change = self.local.last_change().await?;
        report.local_changed = {
            let last_seen = self.last_seen_change.lock().await;
            current_change.is_some() && *last_seen != current_change
        };

        let mut remotes = self.remote.fetch_all_by_owner(&self.owner).await?;
        let mut locals = self.local.list_by_owner(&self.owner).await?;
        log::debug!(
            "Reconciling {}: {} remote, {} local",
            self.owner,
            remotes.len(),
            locals.len()
        );

        self.adopt_unlinked(&mut remotes, &mut locals, &mut report).await;
        self.retry_creates(&mut remotes, &mut locals, &mut report).await;

        if remotes.len() != locals.len() {
            log::info!(
                "Drift detected for {}: {} remote vs {} local",
                self.owner,
                remotes.len(),
                locals.len()
            );
            self.pull_missing(&remotes, &mut locals, &mut report).await;
        }

        self.resolve_conflicts(&remotes, &locals, &mut report).await;

        *self.last_seen_change.lock().await = self.local.last_change().await?;

        if report.is_noop() && report.failed == 0 {
            log::debug!("Reconciliation finished: {report}");
        } else {
            log::info!("Reconciliation finished: {report}");
        }
        Ok(Some(report))
    }

    async fn adopt_unlinked(
        &self,
        remotes: &mut Vec<RemoteTask>,
        locals: &mut [Task],
        report: &mut PassReport,
    ) {
        let view: &[Task] = locals;
        let adoptions: Vec<(String, i64)> = remotes
            .iter()
            .filter_map(|remote| match identity::identify(remote, view) {
                Identity::Unlinked(local) => Some((local.local_id.clone(), remote.remote_id)),
                _ => None,
            })
            .collect();

        for (local_id, remote_id) in adoptions {
            let updated = match self
                .local
                .update_fields(&local_id, TaskPatch::remote_id(remote_id))
                .await
            {
                Ok(updated) => updated,
                Err(e) => {
                    log::warn!("Failed to adopt remote {remote_id} for task {local_id}: {e}");
                    report.failed += 1;
                    continue;
                }
            };

            if updated.remote_id == Some(remote_id) {
                log::info!("Adopted remote {remote_id} for task {local_id}");
                replace(locals, updated);
                report.linked += 1;
                continue;
            }

            // Another remote copy with the same browser id was adopted first.
            match self.remote.delete_by_id(remote_id).await {
                Ok(()) => {
                    log::info!(
                        "Removed remote {remote_id}, a duplicate of task {local_id} (linked to {:?})",
                        updated.remote_id
                    );
                    remotes.retain(|r| r.remote_id != remote_id);
                    report.duplicates_removed += 1;
                }
                Err(e) => {
                    log::warn!("Failed to remove duplicate remote {remote_id} of task {local_id}: {e}");
                    report.failed += 1;
                }
            }
        }
    }

    async fn retry_creates(
        &self,
        remotes: &mut Vec<RemoteTask>,
        locals: &mut [Task],
        report: &mut PassReport,
    ) {
        let pending: Vec<String> = locals
            .iter()
            .filter(|t| t.remote_id.is_none())
            .map(|t| t.local_id.clone())
            .collect();

        for local_id in pending {
            let remote_id = match self.propagate_create(&local_id).await {
                Ok(Some(remote_id)) => remote_id,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Retrying create for task {local_id} failed: {e}");
                    report.failed += 1;
                    continue;
                }
            };

            match self.local.get_by_id(&local_id).await {
                Ok(Some(task)) => {
                    if !remotes.iter().any(|r| r.remote_id == remote_id) {
                        remotes.push(RemoteTask::from_local(&task, remote_id));
                    }
                    replace(locals, task);
                    report.created += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Failed to re-read task {local_id} after create: {e}");
                    report.failed += 1;
                }
            }
        }
    }

    async fn pull_missing(&self, remotes: &[RemoteTask], locals: &mut Vec<Task>, report: &mut PassReport) {
        let mut taken = std::collections::HashSet::new();
        for remote in identity::missing_locally(remotes, &*locals) {
            let local_id = identity::assign_local_id(remote, locals, &mut taken);
            let task = remote.clone().into_local(local_id);
            match self.local.insert(task.clone()).await {
                Ok(local_id) => {
                    log::info!("Pulled remote {} as task {local_id}", remote.remote_id);
                    locals.push(task);
                    report.pulled += 1;
                }
                Err(e) => {
                    log::warn!("Failed to pull remote {}: {e}", remote.remote_id);
                    report.failed += 1;
                }
            }
        }
    }

    async fn resolve_conflicts(&self, remotes: &[RemoteTask], locals: &[Task], report: &mut PassReport) {
        let by_remote_id = identity::index_by_remote_id(remotes);

        for local in locals {
            let Some(remote_id) = local.remote_id else {
                continue;
            };
            let Some(remote) = by_remote_id.get(&remote_id) else {
                // Remote deletions are not mirrored locally.
                log::debug!("Task {} links to remote {remote_id}, which no longer exists", local.local_id);
                continue;
            };

            match conflict::resolve(local, remote) {
                Resolution::InSync => {}
                Resolution::RemoteWins(patch) => {
                    match self.local.update_fields(&local.local_id, patch).await {
                        Ok(_) => {
                            log::debug!("Remote {remote_id} overwrote task {}", local.local_id);
                            report.overwritten += 1;
                        }
                        Err(e) => {
                            log::warn!("Failed to apply remote {remote_id} to task {}: {e}", local.local_id);
                            report.failed += 1;
                        }
                    }
                }
                Resolution::LocalWins => match self.remote.update(local).await {
                    Ok(()) => {
                        log::debug!("Task {} overwrote remote {remote_id}", local.local_id);
                        report.pushed += 1;
                    }
                    Err(e) => {
                        log::warn!("Failed to push task {} to remote {remote_id}: {e}", local.local_id);
                        report.failed += 1;
                    }
                },
            }
        }
    }

    // --- Scheduling ---

    /// Run the periodic loop on the tokio runtime until the handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Pass immediately, then every `interval` after the previous pass
    /// completed. With `sync_on_reconnect`, an offline to online transition
    /// also triggers a pass and re-arms the timer.
    pub async fn run(&self) {
        let mut transitions = self.connectivity.subscribe();
        let mut next_pass = Instant::now();

        loop {
            select! {
                _ = sleep_until(next_pass) => {
                    self.run_pass("scheduled").await;
                    next_pass = Instant::now() + self.interval;
                }
                transition = transitions.recv() => {
                    match transition {
                        Ok(true) if self.sync_on_reconnect => {
                            self.run_pass("reconnect").await;
                            next_pass = Instant::now() + self.interval;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            log::debug!("Missed {skipped} connectivity transitions");
                        }
                        Err(RecvError::Closed) => {
                            transitions = self.connectivity.subscribe();
                        }
                    }
                }
            }
        }
    }

    async fn run_pass(&self, trigger: &str) {
        match self.reconcile().await {
            Ok(Some(_)) => {}
            Ok(None) => log::trace!("No {trigger} pass ran"),
            Err(e) => log::warn!("{trigger} reconciliation failed: {e}"),
        }
    }
}

fn replace(locals: &mut [Task], task: Task) {
    if let Some(slot) = locals.iter_mut().find(|t| t.local_id == task.local_id) {
        *slot = task;
    }
}

/// Log the outcome of a remote propagation triggered by a user action.
fn best_effort<T>(op: &str, local_id: &str, result: SyncResult<T>) {
    match result {
        Ok(_) => {}
        Err(SyncError::Offline) => log::debug!("Offline; {op} of task {local_id} deferred"),
        Err(e) => log::warn!("Propagating {op} of task {local_id} failed: {e}"),
    }
}
