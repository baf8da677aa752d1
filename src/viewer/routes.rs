//! HTTP routes for the live viewer

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{interval, Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use super::HubHandle;
use crate::error::Error;
use crate::notify::Notification;
use crate::ops::Session;
use crate::registry::RegistryEntry;
use crate::task::{Priority, Task, TaskFilter, TaskPatch, TaskStatus};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Kanban board served at `/`; it only talks to the API below
const BOARD_HTML: &str = include_str!("board.html");

/// Shared server state
#[derive(Clone)]
pub struct ViewerState {
    session: Arc<Session>,
    hub: HubHandle,
    current: Option<RegistryEntry>,
}

impl ViewerState {
    pub fn new(session: Session, hub: HubHandle, current: Option<RegistryEntry>) -> Self {
        Self {
            session: Arc::new(session),
            hub,
            current,
        }
    }

    /// Run a session call on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Session) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || f(&session))
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?
            .map_err(ApiError::from)
    }
}

/// Create the viewer router
pub fn router(state: ViewerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(board))
        .route("/ws", get(ws_upgrade))
        .route("/api/projects", get(list_projects))
        .route(
            "/api/projects/{name}/tasks",
            get(list_tasks).post(create_task),
        )
        .route(
            "/api/projects/{name}/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/notify", post(receive_notification))
        .route("/api/current-project", get(current_project))
        .layer(cors)
        .with_state(state)
}

async fn board() -> Html<&'static str> {
    Html(BOARD_HTML)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Busy(String),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        if err.is_not_found() {
            return ApiError::NotFound(message);
        }
        match err {
            Error::Validation(_) => ApiError::BadRequest(message),
            Error::Conflict(_) => ApiError::Conflict(message),
            Error::LockTimeout { .. } | Error::LockNotOwned { .. } => ApiError::Busy(message),
            _ => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Busy(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

fn parse_field<T>(value: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: std::str::FromStr<Err = Error>,
{
    value
        .filter(|raw| !raw.is_empty())
        .map(|raw| raw.parse::<T>().map_err(ApiError::from))
        .transpose()
}

// ============================================================================
// Projects
// ============================================================================

async fn list_projects(
    State(state): State<ViewerState>,
) -> Result<Json<Vec<RegistryEntry>>, ApiError> {
    let projects = state
        .blocking(|session| {
            let registry = session.load_registry()?;
            Ok(registry.list().into_iter().cloned().collect())
        })
        .await?;
    Ok(Json(projects))
}

async fn current_project(State(state): State<ViewerState>) -> impl IntoResponse {
    let project = state.current.as_ref().map(|entry| {
        serde_json::json!({
            "name": entry.name,
            "path": entry.path,
        })
    });
    Json(serde_json::json!({
        "has_current_project": project.is_some(),
        "current_project": project,
    }))
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
}

async fn list_tasks(
    State(state): State<ViewerState>,
    Path(name): Path<String>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let filter = TaskFilter {
        status: parse_field::<TaskStatus>(query.status.as_deref())?,
        priority: parse_field::<Priority>(query.priority.as_deref())?,
        assigned_to: query.assigned_to,
        locked_by: None,
    };
    let tasks = state
        .blocking(move |session| {
            session.project_by_name(&name)?;
            Ok(session.read_store(&name)?.list_tasks(&filter))
        })
        .await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<ViewerState>,
    Path((name, id)): Path<(String, u64)>,
) -> Result<Json<Task>, ApiError> {
    let task = state
        .blocking(move |session| {
            session.project_by_name(&name)?;
            session.read_store(&name)?.get_task(id)
        })
        .await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
}

async fn create_task(
    State(state): State<ViewerState>,
    Path(name): Path<String>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let priority = parse_field::<Priority>(req.priority.as_deref())?;
    let task = state
        .blocking(move |session| {
            session.project_by_name(&name)?;
            session.create_task(
                &name,
                &req.title,
                &req.description,
                priority,
                req.assigned_to.as_deref(),
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// Partial update body. An empty `assigned_to` clears the assignee.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
}

impl UpdateTaskRequest {
    fn into_patch(self) -> Result<TaskPatch, ApiError> {
        Ok(TaskPatch {
            status: parse_field(self.status.as_deref())?,
            priority: parse_field(self.priority.as_deref())?,
            title: self.title,
            description: self.description,
            assigned_to: self
                .assigned_to
                .map(|assignee| Some(assignee).filter(|a| !a.trim().is_empty())),
        })
    }
}

async fn update_task(
    State(state): State<ViewerState>,
    Path((name, id)): Path<(String, u64)>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let patch = req.into_patch()?;
    let task = state
        .blocking(move |session| {
            session.project_by_name(&name)?;
            session.update_task(&name, id, &patch)
        })
        .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<ViewerState>,
    Path((name, id)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    state
        .blocking(move |session| {
            session.project_by_name(&name)?;
            session.delete_task(&name, id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Change fan-out
// ============================================================================

/// Accept a notification from a CLI process and fan it out
async fn receive_notification(
    State(state): State<ViewerState>,
    Json(notification): Json<Notification>,
) -> Result<StatusCode, ApiError> {
    let clients = state
        .hub
        .broadcast(&notification.viewer_payload())
        .map_err(ApiError::from)?;
    debug!(kind = %notification.kind, project = %notification.project, clients, "notification received");
    Ok(StatusCode::OK)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ViewerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state.hub))
}

/// Forward hub messages to one connection until either side goes away
async fn handle_ws(socket: WebSocket, hub: HubHandle) {
    let (id, mut queue) = hub.register();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            outbound = queue.recv() => {
                match outbound {
                    Some(text) => {
                        if ws_sender.send(Message::Text(text.into())).await.is_err() {
                            debug!(client = id, "viewer send failed");
                            break;
                        }
                    }
                    None => {
                        // Dropped by the hub
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = ping_interval.tick() => {
                if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.unregister(id);
}
