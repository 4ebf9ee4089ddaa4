#![allow(dead_code)]

//! In-process fake of the remote to-do API, served by axum on an ephemeral port.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use tasksync::{
    ConnectivityMonitor, HttpRemoteStore, LocalStore, Reconciler, RemoteTask, Status,
};

pub const OWNER: &str = "alice";

#[derive(Default)]
struct Tasks {
    by_id: BTreeMap<i64, RemoteTask>,
    next_id: i64,
}

/// Server-side state, shared with the test for seeding and inspection.
#[derive(Default)]
pub struct FakeApi {
    tasks: Mutex<Tasks>,
    pub posts: AtomicUsize,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
    /// Answer POST with 500 without storing anything.
    pub reject_creates: AtomicBool,
    /// Store the task on POST but answer 502, as if the response was lost.
    pub lose_create_responses: AtomicBool,
    /// Answer POST with 201 but no `Location` header.
    pub omit_location: AtomicBool,
    /// Delay before answering the list endpoint.
    pub list_delay_ms: AtomicU64,
}

impl FakeApi {
    pub fn seed(&self, task: RemoteTask) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.next_id = tasks.next_id.max(task.remote_id);
        tasks.by_id.insert(task.remote_id, task);
    }

    pub fn get(&self, remote_id: i64) -> Option<RemoteTask> {
        self.tasks.lock().unwrap().by_id.get(&remote_id).cloned()
    }

    pub fn all(&self) -> Vec<RemoteTask> {
        self.tasks.lock().unwrap().by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().by_id.len()
    }

    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Start the fake API and return its base URL.
pub async fn spawn_api() -> (Url, Arc<FakeApi>) {
    init_logging();
    let api = Arc::new(FakeApi::default());
    let app = Router::new()
        .route("/to-do/task/", get(list).post(create).put(update))
        .route("/to-do/task/{id}", get(fetch).delete(remove))
        .route("/to-do/task/total-count-for/{owner}", get(count))
        .with_state(api.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&format!("http://{addr}/")).unwrap(), api)
}

/// A reconciler over a fresh in-memory replica and the HTTP client.
pub async fn reconciler_for(base: &Url, online: bool) -> Reconciler {
    let local = Arc::new(
        LocalStore::connect("sqlite::memory:")
            .await
            .expect("Failed to open local store"),
    );
    let monitor = Arc::new(ConnectivityMonitor::new(online));
    let remote = Arc::new(
        HttpRemoteStore::new(base.clone(), Duration::from_secs(2), monitor.clone())
            .expect("Failed to build HTTP client"),
    );
    Reconciler::new(local, remote, monitor, OWNER)
}

pub fn remote_task(remote_id: i64, name: &str, last_modified: i64) -> RemoteTask {
    RemoteTask {
        remote_id,
        browser_id: None,
        name: name.to_string(),
        owner: OWNER.to_string(),
        status: Status::Active,
        created: 1,
        last_modified,
        difficulty: Default::default(),
        importance: Default::default(),
        deadline: None,
    }
}

#[derive(Deserialize)]
struct OwnerQuery {
    owner: String,
}

async fn create(State(api): State<Arc<FakeApi>>, Json(mut body): Json<Value>) -> Response {
    api.posts.fetch_add(1, Ordering::SeqCst);
    if api.reject_creates.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "create rejected").into_response();
    }

    let id = {
        let mut tasks = api.tasks.lock().unwrap();
        tasks.next_id += 1;
        let id = tasks.next_id;
        body["id"] = json!(id);
        let task: RemoteTask = match serde_json::from_value(body) {
            Ok(task) => task,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };
        tasks.by_id.insert(id, task);
        id
    };

    if api.lose_create_responses.load(Ordering::SeqCst) {
        return StatusCode::BAD_GATEWAY.into_response();
    }
    if api.omit_location.load(Ordering::SeqCst) {
        return StatusCode::CREATED.into_response();
    }
    (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/to-do/task/{id}"))],
    )
        .into_response()
}

async fn list(State(api): State<Arc<FakeApi>>, Query(query): Query<OwnerQuery>) -> Response {
    let delay = api.list_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let tasks: Vec<RemoteTask> = api
        .all()
        .into_iter()
        .filter(|t| t.owner == query.owner)
        .collect();
    Json(tasks).into_response()
}

async fn update(State(api): State<Arc<FakeApi>>, Json(body): Json<RemoteTask>) -> Response {
    api.puts.fetch_add(1, Ordering::SeqCst);
    let mut tasks = api.tasks.lock().unwrap();
    match tasks.by_id.get_mut(&body.remote_id) {
        Some(slot) => {
            *slot = body;
            StatusCode::OK.into_response()
        }
        None => (StatusCode::NOT_FOUND, "no such task").into_response(),
    }
}

async fn fetch(State(api): State<Arc<FakeApi>>, Path(id): Path<i64>) -> Response {
    match api.get(id) {
        Some(task) => Json(task).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn remove(State(api): State<Arc<FakeApi>>, Path(id): Path<i64>) -> Response {
    api.deletes.fetch_add(1, Ordering::SeqCst);
    match api.tasks.lock().unwrap().by_id.remove(&id) {
        Some(_) => StatusCode::OK.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn count(State(api): State<Arc<FakeApi>>, Path(owner): Path<String>) -> Response {
    let n = api.all().iter().filter(|t| t.owner == owner).count();
    Json(n as u64).into_response()
}
