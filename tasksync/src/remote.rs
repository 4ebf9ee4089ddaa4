//! Client for the remote to-do API.
//!
//! | Operation     | Method | Path                                   |
//! |---------------|--------|----------------------------------------|
//! | Create        | POST   | `/to-do/task/`                         |
//! | Read one      | GET    | `/to-do/task/{remoteId}`               |
//! | Read by owner | GET    | `/to-do/task/?owner={owner}`           |
//! | Update        | PUT    | `/to-do/task/`                         |
//! | Delete        | DELETE | `/to-do/task/{remoteId}`               |
//! | Count         | GET    | `/to-do/task/total-count-for/{owner}`  |
//!
//! Every call checks the [`ConnectivityMonitor`] first and fails with
//! [`SyncError::Offline`] without touching the network. Nothing is queued or
//! retried here; retries belong to the reconciler.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header::LOCATION, Client, StatusCode, Url};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::task::{RemoteTask, Task, TaskPayload};

const TASK_PATH: &str = "to-do/task/";
const COUNT_PATH: &str = "to-do/task/total-count-for/";

/// The remote operations the reconciler depends on.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create `task` remotely and return the server-assigned identifier.
    async fn create(&self, task: &Task) -> SyncResult<i64>;

    /// Replace the remote record identified by `task.remote_id`.
    async fn update(&self, task: &Task) -> SyncResult<()>;

    async fn delete_by_id(&self, remote_id: i64) -> SyncResult<()>;

    async fn fetch_by_id(&self, remote_id: i64) -> SyncResult<RemoteTask>;

    async fn fetch_all_by_owner(&self, owner: &str) -> SyncResult<Vec<RemoteTask>>;

    async fn count_by_owner(&self, owner: &str) -> SyncResult<u64>;
}

/// [`RemoteStore`] over HTTP/JSON.
pub struct HttpRemoteStore {
    client: Client,
    base: Url,
    connectivity: Arc<ConnectivityMonitor>,
}

impl HttpRemoteStore {
    /// `base` is the API root, e.g. `http://localhost:8080/`. Every request
    /// carries `timeout` and fails with [`SyncError::Remote`] when it elapses.
    pub fn new(
        base: Url,
        timeout: Duration,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> SyncResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: with_trailing_slash(base),
            connectivity,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn ensure_online(&self) -> SyncResult<()> {
        if self.connectivity.is_online() {
            Ok(())
        } else {
            Err(SyncError::Offline)
        }
    }

    fn url(&self, path: &str) -> SyncResult<Url> {
        self.base
            .join(path)
            .map_err(|e| SyncError::remote(None, format!("invalid request path {path}: {e}")))
    }

    fn task_url(&self, remote_id: i64) -> SyncResult<Url> {
        self.url(&format!("{TASK_PATH}{remote_id}"))
    }
}

#[async_trait::async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(&self, task: &Task) -> SyncResult<i64> {
        self.ensure_online()?;
        let response = self
            .client
            .post(self.url(TASK_PATH)?)
            .json(&TaskPayload::from(task))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(rejected(response).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| SyncError::remote(Some(status.as_u16()), "create response has no Location header"))?;

        parse_trailing_id(location).ok_or_else(|| {
            SyncError::remote(
                Some(status.as_u16()),
                format!("no numeric identifier at the end of Location `{location}`"),
            )
        })
    }

    async fn update(&self, task: &Task) -> SyncResult<()> {
        self.ensure_online()?;
        if task.remote_id.is_none() {
            return Err(SyncError::remote(
                None,
                format!("task {} has no remote id to update", task.local_id),
            ));
        }

        let response = self
            .client
            .put(self.url(TASK_PATH)?)
            .json(&TaskPayload::from(task))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(rejected(response).await);
        }
        Ok(())
    }

    async fn delete_by_id(&self, remote_id: i64) -> SyncResult<()> {
        self.ensure_online()?;
        let response = self.client.delete(self.task_url(remote_id)?).send().await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(())
    }

    async fn fetch_by_id(&self, remote_id: i64) -> SyncResult<RemoteTask> {
        self.ensure_online()?;
        let response = self.client.get(self.task_url(remote_id)?).send().await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(response.json::<RemoteTask>().await?)
    }

    async fn fetch_all_by_owner(&self, owner: &str) -> SyncResult<Vec<RemoteTask>> {
        self.ensure_online()?;
        let response = self
            .client
            .get(self.url(TASK_PATH)?)
            .query(&[("owner", owner)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(response.json::<Vec<RemoteTask>>().await?)
    }

    async fn count_by_owner(&self, owner: &str) -> SyncResult<u64> {
        self.ensure_online()?;
        let mut url = self.url(COUNT_PATH)?;
        url.path_segments_mut()
            .map_err(|_| SyncError::remote(None, "base URL cannot carry a path"))?
            .pop_if_empty()
            .push(owner);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(response.json::<u64>().await?)
    }
}

/// Turn a non-success response into [`SyncError::Remote`], keeping the body for the log.
async fn rejected(response: reqwest::Response) -> SyncError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request rejected").to_string()
    } else {
        body
    };
    SyncError::remote(Some(status.as_u16()), message)
}

/// Extract the identifier from the trailing digits of a `Location` value,
/// e.g. `http://host/to-do/task/42` -> `42`.
pub fn parse_trailing_id(location: &str) -> Option<i64> {
    let trimmed = location.trim().trim_end_matches('/');
    let digits_start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    trimmed[digits_start..].parse().ok()
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
