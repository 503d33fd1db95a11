//! HTTP API served by every worker
//!
//! | Method | Path             | Success              |
//! |--------|------------------|----------------------|
//! | GET    | /api/users       | 200 all records      |
//! | GET    | /api/users/:id   | 200 record           |
//! | POST   | /api/users       | 201 created record   |
//! | PUT    | /api/users/:id   | 200 updated record   |
//! | DELETE | /api/users/:id   | 200 confirmation     |
//! | GET    | /health          | 200 worker status    |

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::limit::RequestBodyLimitLayer;

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{parse_id, ChannelSender, ControlMessage, Record, RecordFields, Result};
use crate::worker::store::RecordStore;

/// Shared worker state for HTTP handlers and the sync applier.
#[derive(Clone)]
pub struct WorkerState {
    store: Arc<Mutex<RecordStore>>,
    notifier: Option<ChannelSender>,
    slot: Option<usize>,
}

impl WorkerState {
    /// State for a standalone server: no coordinator to notify.
    pub fn standalone(store: RecordStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            notifier: None,
            slot: None,
        }
    }

    /// State for a cluster worker reporting writes over `notifier`.
    pub fn clustered(store: RecordStore, slot: usize, notifier: ChannelSender) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            notifier: Some(notifier),
            slot: Some(slot),
        }
    }

    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Lock the store. A panic mid-handler can't leave a half-applied
    /// mutation (each operation is a single assignment), so poisoning is
    /// ignored.
    pub fn store(&self) -> MutexGuard<'_, RecordStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report the post-write record set to the coordinator. Must be called
    /// with the store still locked so notifications leave in write order.
    fn notify_change(&self, store: &RecordStore) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let msg = ControlMessage::ChangeNotification {
            records: store.list().to_vec(),
        };
        if let Err(e) = notifier.send(msg) {
            tracing::warn!("Change notification not delivered: {}", e);
        }
    }
}

/// Creates the worker router.
pub fn create_router(state: WorkerState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/health", get(health))
        .fallback(not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn list_users(State(state): State<WorkerState>) -> Json<Vec<Record>> {
    Json(state.store().list().to_vec())
}

async fn get_user(
    State(state): State<WorkerState>,
    Path(id): Path<String>,
) -> Result<Json<Record>> {
    let record = state.store().get(&id)?.clone();
    Ok(Json(record))
}

async fn create_user(
    State(state): State<WorkerState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Record>)> {
    let fields = RecordFields::from_json(&body)?;

    let mut store = state.store();
    let record = store.insert(fields)?;
    state.notify_change(&store);
    tracing::debug!("Created user {}", record.id);

    Ok((StatusCode::CREATED, Json(record)))
}

/// Update of a missing id is a 404, never a silent no-op.
async fn update_user(
    State(state): State<WorkerState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Record>> {
    parse_id(&id)?;
    let fields = RecordFields::from_json(&body)?;

    let mut store = state.store();
    let record = store.update(&id, fields)?;
    state.notify_change(&store);
    tracing::debug!("Updated user {}", record.id);

    Ok(Json(record))
}

async fn delete_user(
    State(state): State<WorkerState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let mut store = state.store();
    if store.delete(&id)? {
        state.notify_change(&store);
        tracing::debug!("Deleted user {}", id);
    }
    Ok(Json(json!({ "message": "User deleted" })))
}

async fn health(State(state): State<WorkerState>) -> impl IntoResponse {
    let (records, sync_seq) = {
        let store = state.store();
        (store.len(), store.synced_seq())
    };
    Json(json!({
        "status": "healthy",
        "slot": state.slot,
        "records": records,
        "sync_seq": sync_seq,
        "version": crate::VERSION,
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}
