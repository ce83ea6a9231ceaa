use axum::{
    Router,
    body::Bytes,
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
};
use tracing::info;

use common::error::ApiError;

use crate::core::state::CollectorState;
use crate::model::node::Node;
use crate::model::parser::parse_monitor_stats;

pub fn router(state: CollectorState) -> Router {
    Router::new()
        .route("/ingest/{node}", post(ingest_stats))
        .route("/groups/{id}/metadata", post(ingest_group_metadata))
        .route("/summary", get(summary))
        .route("/snapshot", get(snapshot))
        .route("/nodes", get(list_nodes))
        .route("/nodes/{node}", get(node_info))
        .route("/nodes/{node}/backends", get(node_list_backends))
        .route("/backends/{node}/{id}", get(backend_info))
        .route("/groups/{id}", get(group_info))
        .route("/couples/{key}", get(couple_info))
        .route("/fs/{host}/{fsid}", get(fs_info))
        .route("/fs/{host}/{fsid}/backends", get(fs_list_backends))
        .route("/dc/{host}", get(resolve_dc))
        .with_state(state)
}

// POST /ingest/{node}
/// Accepts one monitor-stats document for one node. A malformed document
/// discards the whole batch.
#[tracing::instrument(name = "collector.ingest", skip(ctx, body), fields(node = node_key))]
async fn ingest_stats(
    Path(node_key): Path<String>,
    State(ctx): State<CollectorState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let (host, port, family) = Node::parse_key(&node_key).ok_or_else(|| {
        ApiError::InvalidArgument(format!(
            "invalid node key '{}', syntax: <host>:<port>:<family>",
            node_key
        ))
    })?;

    let parsed =
        parse_monitor_stats(&body).map_err(|e| ApiError::StatsRejected(e.to_string()))?;

    let backends = parsed.backends.len();
    ctx.storage.ingest(&host, port, family, parsed);
    info!("ingested stats for {} ({} backends)", node_key, backends);

    Ok(StatusCode::OK)
}

// POST /groups/{id}/metadata
/// Accepts one packed-map metadata blob for one group. A blob that fails
/// to decode turns only that group BAD; the request still succeeds.
async fn ingest_group_metadata(
    Path(group_id): Path<u64>,
    State(ctx): State<CollectorState>,
    body: Bytes,
) -> StatusCode {
    ctx.storage.save_group_metadata(group_id, &body);
    StatusCode::OK
}

// GET /summary
async fn summary(State(ctx): State<CollectorState>) -> String {
    ctx.storage.summary()
}

// GET /snapshot
/// A coherent cross-entity view, mutually exclusive with ingestion.
async fn snapshot(State(ctx): State<CollectorState>) -> Json<serde_json::Value> {
    Json(ctx.storage.snapshot_json(false))
}

// GET /nodes
async fn list_nodes(State(ctx): State<CollectorState>) -> String {
    let nodes = ctx.storage.nodes();
    let mut out = format!("There are {} nodes\n", nodes.len());
    for node in nodes {
        out.push_str(&format!("  {}\n", node.key()));
    }
    out
}

// GET /nodes/{node}
async fn node_info(
    Path(node_key): Path<String>,
    State(ctx): State<CollectorState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let node = ctx
        .storage
        .node(&node_key)
        .ok_or_else(|| ApiError::NodeNotFound(node_key.clone()))?;

    let mut value = node.to_json();
    value["dc"] = serde_json::json!(ctx.inventory.get_dc(node.host()).await);
    Ok(Json(value))
}

// GET /nodes/{node}/backends
async fn node_list_backends(
    Path(node_key): Path<String>,
    State(ctx): State<CollectorState>,
) -> Result<String, ApiError> {
    let node = ctx
        .storage
        .node(&node_key)
        .ok_or_else(|| ApiError::NodeNotFound(node_key.clone()))?;

    let backends = node.backends();
    let mut out = format!("Node has {} backends\n", backends.len());
    for backend in backends {
        out.push_str(&format!("  {}\n", backend.key()));
    }
    Ok(out)
}

// GET /backends/{node}/{id}
async fn backend_info(
    Path((node_key, backend_id)): Path<(String, u64)>,
    State(ctx): State<CollectorState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let node = ctx
        .storage
        .node(&node_key)
        .ok_or_else(|| ApiError::NodeNotFound(node_key.clone()))?;
    let backend = node
        .backend(backend_id)
        .ok_or_else(|| ApiError::BackendNotFound(format!("{}/{}", node_key, backend_id)))?;

    Ok(Json(backend.to_json(false)))
}

// GET /groups/{id}
async fn group_info(
    Path(group_id): Path<u64>,
    State(ctx): State<CollectorState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let group = ctx
        .storage
        .group(group_id)
        .ok_or(ApiError::GroupNotFound(group_id))?;

    Ok(Json(group.to_json(false)))
}

// GET /couples/{key}
async fn couple_info(
    Path(key): Path<String>,
    State(ctx): State<CollectorState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let couple = ctx
        .storage
        .couple(&key)
        .ok_or_else(|| ApiError::CoupleNotFound(key.clone()))?;

    Ok(Json(couple.to_json()))
}

// GET /fs/{host}/{fsid}
async fn fs_info(
    Path((host, fsid)): Path<(String, u64)>,
    State(ctx): State<CollectorState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = format!("{}/{}", host, fsid);
    let fs = ctx.storage.fs(&key).ok_or(ApiError::FsNotFound(key))?;

    Ok(Json(fs.to_json()))
}

// GET /fs/{host}/{fsid}/backends
async fn fs_list_backends(
    Path((host, fsid)): Path<(String, u64)>,
    State(ctx): State<CollectorState>,
) -> Result<String, ApiError> {
    let key = format!("{}/{}", host, fsid);
    let fs = ctx.storage.fs(&key).ok_or(ApiError::FsNotFound(key))?;

    let mut backends = fs.backends();
    backends.sort_by(|a, b| a.key().cmp(b.key()));

    let mut out = format!("There are {} backends\n", backends.len());
    for backend in backends {
        out.push_str(&format!("  {}\n", backend.key()));
    }
    Ok(out)
}

// GET /dc/{host}
async fn resolve_dc(Path(host): Path<String>, State(ctx): State<CollectorState>) -> String {
    ctx.inventory.get_dc(&host).await
}
