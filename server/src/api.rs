//! HTTP endpoints.
//!
//! Every endpoint except `/register` and `/login` sits behind the header
//! auth middleware. Mutating handlers wake the user's long-pollers after
//! their transaction has committed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Form, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use models::{Delta, LongpollResponse, RevisionEntry, ServerConfig, Token};
use toolkit::{clean_path, only_clean_path};

use crate::blob::BlobStore;
use crate::error::ServerError;
use crate::store::{Session, Store, User};
use crate::wake::WakeRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<Store>>,
    pub blobs: Arc<BlobStore>,
    pub wakes: Arc<WakeRegistry>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Store, blobs: BlobStore, config: ServerConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            blobs: Arc::new(blobs),
            wakes: Arc::new(WakeRegistry::new()),
            config: Arc::new(config),
        }
    }
}

/// Authenticated request identity, inserted by the auth middleware.
#[derive(Clone)]
pub struct AuthedUser {
    pub user: User,
    pub session: Session,
}

pub fn build_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/delta", post(delta))
        .route("/longpoll_delta", get(longpoll_delta))
        .route("/files_put/{*filepath}", put(files_put))
        .route("/files/{*filepath}", get(get_file))
        .route("/metadata/{*filepath}", get(metadata))
        .route("/revisions/{*filepath}", get(revisions))
        .route("/create_folder", post(create_folder))
        .route("/remove", post(remove))
        .route("/check_upload", post(check_upload))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .merge(authed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "starting cloudsyncer server");
    axum::serve(listener, app).await?;
    Ok(())
}

/* Auth */

fn auth_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ServerError> {
    let value = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if value.is_empty() {
        return Err(ServerError::Forbidden(format!("{name} not provided or empty")));
    }
    Ok(value)
}

async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let (username, token) = {
        let headers = req.headers();
        let username = auth_header(headers, "X-Cloudsyncer-Username")?;
        if username.len() > 255 {
            return Err(ServerError::Forbidden("username too long".into()));
        }
        let token = auth_header(headers, "X-Cloudsyncer-Authtoken")?;
        if token.len() > 255 {
            return Err(ServerError::TooLong("token"));
        }
        (username.to_string(), token.to_string())
    };

    let authed = {
        let store = state.store.lock().await;
        let user = store
            .get_user(&username)?
            .ok_or_else(|| ServerError::Forbidden("invalid credentials".into()))?;
        let session = store
            .get_session(user.id, &token)?
            .ok_or_else(|| ServerError::Forbidden("invalid credentials".into()))?;
        AuthedUser { user, session }
    };

    req.extensions_mut().insert(authed);
    Ok(next.run(req).await)
}

/* Account endpoints */

#[derive(Debug, Deserialize)]
struct CredentialsForm {
    username: Option<String>,
    password: Option<String>,
    computername: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ServerError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServerError::BadRequest(format!("{name} not provided or empty")))
}

async fn register(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> Result<Response, ServerError> {
    let username = required(&form.username, "username")?;
    if username.len() > 255 {
        return Err(ServerError::BadRequest("username too long".into()));
    }
    let password = required(&form.password, "password")?;
    if password.len() > 255 {
        return Err(ServerError::TooLong("password"));
    }

    let store = state.store.lock().await;
    let user = store.create_user(username, password)?;
    info!(username, "registered user");

    match form.computername.as_deref().filter(|c| !c.is_empty()) {
        Some(computername) => {
            let session = store.create_session(&user, computername)?;
            Ok(Json(Token {
                authencity_token: session.token,
            })
            .into_response())
        }
        None => Ok(StatusCode::OK.into_response()),
    }
}

async fn login(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> Result<Json<Token>, ServerError> {
    let username = required(&form.username, "username")?;
    if username.len() > 255 {
        return Err(ServerError::BadRequest("username too long".into()));
    }
    let password = required(&form.password, "password")?;
    if password.len() > 255 {
        return Err(ServerError::TooLong("password"));
    }
    let computername = required(&form.computername, "computername")?;

    let store = state.store.lock().await;
    let user = store
        .get_user(username)?
        .ok_or_else(|| ServerError::Forbidden("user does not exist".into()))?;
    if !user.check_password(password) {
        return Err(ServerError::Forbidden(format!(
            "wrong password for user {username}"
        )));
    }
    let session = store.create_session(&user, computername)?;
    info!(username, computername, "logged in");
    Ok(Json(Token {
        authencity_token: session.token,
    }))
}

/* Sync endpoints */

#[derive(Debug, Deserialize)]
struct DeltaForm {
    cursor: Option<String>,
}

async fn delta(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Form(form): Form<DeltaForm>,
) -> Result<Json<Delta>, ServerError> {
    let store = state.store.lock().await;
    let delta = match form.cursor.as_deref().filter(|c| !c.is_empty()) {
        None => {
            debug!(user = %authed.user.username, "no cursor provided, sending full state");
            Delta {
                reset: true,
                entries: store.current_state(authed.user.id)?,
                cursor: "0".to_string(),
            }
        }
        Some(raw) => {
            let cursor: i64 = raw
                .parse()
                .map_err(|_| ServerError::BadRequest("cursor parameter is incorrect".into()))?;
            let (entries, new_cursor) = store.changes_from_cursor(authed.user.id, cursor)?;
            Delta {
                reset: false,
                entries,
                cursor: new_cursor.to_string(),
            }
        }
    };
    Ok(Json(delta))
}

#[derive(Debug, Deserialize)]
struct CursorQuery {
    cursor: Option<String>,
}

async fn longpoll_delta(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Query(query): Query<CursorQuery>,
) -> Result<Json<LongpollResponse>, ServerError> {
    let raw = query
        .cursor
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ServerError::BadRequest("missing required parameter cursor".into()))?;
    let cursor: i64 = raw
        .parse()
        .map_err(|_| ServerError::BadRequest("cursor parameter is incorrect".into()))?;

    let pending = {
        let store = state.store.lock().await;
        let (entries, _) = store.changes_from_cursor(authed.user.id, cursor)?;
        !entries.is_empty()
    };
    if pending {
        debug!(
            user = %authed.user.username,
            cursor, "changes immediately available, not polling"
        );
        return Ok(Json(LongpollResponse { changes: true }));
    }

    let rx = state.wakes.register(authed.user.id);
    let timeout = Duration::from_secs(state.config.longpoll_timeout_secs);
    let changes = tokio::select! {
        res = rx => {
            debug!(
                user = %authed.user.username,
                session = %authed.session.token,
                "received change signal"
            );
            res.is_ok()
        }
        _ = tokio::time::sleep(timeout) => {
            debug!(
                user = %authed.user.username,
                session = %authed.session.token,
                "polling timed out"
            );
            false
        }
    };
    Ok(Json(LongpollResponse { changes }))
}

async fn files_put(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Path(filepath): Path<String>,
    body: Bytes,
) -> Result<Json<models::Metadata>, ServerError> {
    let path = only_clean_path(&format!("/{filepath}"));
    let uuid = Uuid::new_v4().to_string();
    let size = state.blobs.store(&uuid, &body).await?;
    let hash = state.blobs.hash(&uuid).await?;

    let meta = {
        let mut store = state.store.lock().await;
        let revision = store.create_revision(authed.user.id, &path, &uuid, size as i64, &hash)?;
        store.metadata_for_revision(revision.id)?
    };
    state.wakes.notify(authed.user.id);
    Ok(Json(meta))
}

#[derive(Debug, Deserialize)]
struct RevQuery {
    rev: Option<String>,
}

/// Resolve the revision a `rev`-aware read endpoint should serve.
fn resolve_revision(
    store: &Store,
    user_id: i64,
    path: &str,
    rev: Option<&str>,
) -> Result<crate::store::Revision, ServerError> {
    let file = store
        .get_file_by_path(user_id, path)?
        .ok_or_else(|| ServerError::NotFound(format!("file {path} not found")))?;
    match rev.filter(|r| !r.is_empty()) {
        Some(raw) => {
            let rev_id: i64 = raw
                .parse()
                .map_err(|_| ServerError::BadRequest("rev parameter is incorrect".into()))?;
            if rev_id == 0 {
                return Err(ServerError::BadRequest("rev parameter is incorrect".into()));
            }
            store
                .revision(&file, rev_id)?
                .ok_or_else(|| ServerError::NotFound(format!("revision {rev_id} of {path}")))
        }
        None => {
            if file.is_removed {
                return Err(ServerError::NotFound(format!("file {path} not found")));
            }
            store.current_revision(&file)
        }
    }
}

async fn get_file(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Path(filepath): Path<String>,
    Query(query): Query<RevQuery>,
) -> Result<Vec<u8>, ServerError> {
    let path = clean_path(&format!("/{filepath}"));
    let revision = {
        let store = state.store.lock().await;
        resolve_revision(&store, authed.user.id, &path, query.rev.as_deref())?
    };
    let data = state.blobs.retrieve(&revision.uuid).await?;
    Ok(data)
}

async fn metadata(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Path(filepath): Path<String>,
    Query(query): Query<RevQuery>,
) -> Result<Json<models::Metadata>, ServerError> {
    let path = clean_path(&format!("/{filepath}"));
    let store = state.store.lock().await;
    let revision = resolve_revision(&store, authed.user.id, &path, query.rev.as_deref())?;
    Ok(Json(store.metadata_for_revision(revision.id)?))
}

async fn revisions(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Path(filepath): Path<String>,
) -> Result<Json<Vec<RevisionEntry>>, ServerError> {
    let path = clean_path(&format!("/{filepath}"));
    let store = state.store.lock().await;
    let file = store
        .get_file_by_path(authed.user.id, &path)?
        .ok_or_else(|| ServerError::NotFound(format!("file {path} not found")))?;
    let entries = store
        .revisions_for_file(file.id)?
        .into_iter()
        .map(|r| RevisionEntry {
            rev: r.id,
            size: r.size,
            path: path.clone(),
            name: r.name,
            modified: r.updated,
            is_dir: r.is_dir,
            current: r.id == file.current_revision_id,
        })
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
struct PathForm {
    path: Option<String>,
}

async fn create_folder(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Form(form): Form<PathForm>,
) -> Result<Json<models::Metadata>, ServerError> {
    let path = required(&form.path, "path")?;
    let meta = {
        let mut store = state.store.lock().await;
        let (_, revision) = store.create_folder(authed.user.id, &only_clean_path(path))?;
        store.metadata_for_revision(revision.id)?
    };
    state.wakes.notify(authed.user.id);
    Ok(Json(meta))
}

async fn remove(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Form(form): Form<PathForm>,
) -> Result<Json<models::Metadata>, ServerError> {
    let path = required(&form.path, "path")?;
    debug!(user = %authed.user.username, path, "received remove request");
    let meta = {
        let mut store = state.store.lock().await;
        let (_, revision) = store.remove(authed.user.id, &clean_path(path))?;
        store.metadata_for_revision(revision.id)?
    };
    state.wakes.notify(authed.user.id);
    Ok(Json(meta))
}

#[derive(Debug, Deserialize)]
struct CheckUploadForm {
    filepath: Option<String>,
    size: Option<String>,
    hash: Option<String>,
    name: Option<String>,
}

/// Upload probe: 204 when the content must be uploaded, 200 when the exact
/// file already exists, 201 when known content was linked under a fresh
/// revision (name or currency differed).
async fn check_upload(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Form(form): Form<CheckUploadForm>,
) -> Result<Response, ServerError> {
    let filepath = required(&form.filepath, "filepath")?;
    let size: i64 = required(&form.size, "size")?
        .parse()
        .map_err(|_| ServerError::BadRequest("size parameter is incorrect".into()))?;
    let hash = required(&form.hash, "hash")?;
    let name = required(&form.name, "name")?;

    let path = clean_path(filepath);
    let mut store = state.store.lock().await;
    let Some(file) = store.get_file_by_path(authed.user.id, &path)? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let Some(revision) = store.revision_by_size_and_hash(file.id, size, hash)? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    if revision.name != name || revision.id != file.current_revision_id {
        let new_revision =
            store.create_revision(authed.user.id, &path, &revision.uuid, revision.size, &revision.hash)?;
        let meta = store.metadata_for_revision(new_revision.id)?;
        return Ok((StatusCode::CREATED, Json(meta)).into_response());
    }

    let meta = store.metadata_for_revision(revision.id)?;
    Ok((StatusCode::OK, Json(meta)).into_response())
}
