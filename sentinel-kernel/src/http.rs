/**
 * API HTTP SENTINEL - Serveur Axum du kernel
 *
 * RÔLE :
 * - POST /report : ingestion des heartbeats agents (auth par secret d'hôte)
 * - Routes de lecture : /health, /system/health, /hosts, /hosts/{id}, /outages
 *
 * SÉCURITÉ :
 * - /report s'authentifie lui-même (secret + IP liée), pas d'API key
 * - Header x-api-key obligatoire sur les routes de lecture sauf /health
 * - L'adresse source vient de la connexion TCP (ConnectInfo), jamais du payload
 */

use crate::health::{HealthTracker, KernelHealth};
use crate::models::{HardwareInfo, HeartbeatIn, Host, MetricSample, Outage};
use crate::monitor::Monitor;
use crate::store::{HostStore, SampleStore, StatusStore, StoreError};
use crate::validator::{constant_time_eq, AuthError, IngestError};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub health_tracker: HealthTracker,
    /// Clé des routes de lecture (SENTINEL_API_KEY), None = lecture refusée
    pub api_key: Option<String>,
}

#[derive(Serialize)]
struct HostView {
    id: String,
    name: String,
    is_online: bool,
    last_seen: Option<String>, // RFC3339
    stale_for_seconds: Option<i64>,
    hardware: Option<HardwareInfo>,
    stats: Option<MetricSample>,
}

#[derive(Serialize)]
struct OutageView {
    #[serde(flatten)]
    outage: Outage,
    server_name: Option<String>,
    duration_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OutagesParams {
    limit: Option<usize>,
}

const DEFAULT_OUTAGES_LIMIT: usize = 50;
const MAX_OUTAGES_LIMIT: usize = 500;

fn to_view(monitor: &Monitor, host: Host, now: OffsetDateTime) -> Result<HostView, StoreError> {
    let store = monitor.store();
    let status = store.get_status(&host.id)?;
    let stats = store.latest_sample(&host.id)?;
    Ok(HostView {
        is_online: status.as_ref().map(|s| s.is_online).unwrap_or(false),
        last_seen: status
            .as_ref()
            .and_then(|s| s.last_seen.format(&Rfc3339).ok()),
        stale_for_seconds: status
            .as_ref()
            .map(|s| (now - s.last_seen).whole_seconds().max(0)),
        id: host.id,
        name: host.name,
        hardware: host.hardware,
        stats,
    })
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // health + ingestion toujours accessibles
    if path == "/health" || path == "/report" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        warn!("[http] SENTINEL_API_KEY not set - read API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .map(|v| constant_time_eq(v.as_bytes(), expected.as_bytes()))
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/report", post(report))
        .route("/hosts", get(get_hosts))
        .route("/hosts/{id}", get(get_host))
        .route("/outages", get(get_outages))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// POST /report (heartbeat agent)
async fn report(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let hb: HeartbeatIn = match serde_json::from_slice(&body) {
        Ok(hb) => hb,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid JSON payload: {e}") })),
            )
        }
    };

    let now = OffsetDateTime::now_utc();
    match app.monitor.ingest(&hb, peer.ip(), now) {
        Ok(_) => {
            // réconciliation + alertes hors du chemin de réponse,
            // horodatées au moment où la passe tourne
            let monitor = app.monitor.clone();
            tokio::spawn(async move {
                monitor.reconcile_and_notify(OffsetDateTime::now_utc()).await;
            });
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        Err(e) => {
            let code = ingest_status(&e);
            if code == StatusCode::INTERNAL_SERVER_ERROR {
                error!("[http] report from {} failed: {}", hb.server_id, e);
            } else {
                warn!("[http] report rejected from {} ({}): {}", peer.ip(), hb.server_id, e);
            }
            (code, Json(json!({ "error": e.to_string() })))
        }
    }
}

fn ingest_status(e: &IngestError) -> StatusCode {
    match e {
        IngestError::Invalid(_) => StatusCode::BAD_REQUEST,
        IngestError::Auth(AuthError::AddressMismatch { .. }) => StatusCode::FORBIDDEN,
        IngestError::Auth(_) => StatusCode::UNAUTHORIZED,
        IngestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.monitor))
}

// GET /hosts (liste + statut + dernière mesure)
async fn get_hosts(State(app): State<AppState>) -> Result<Json<Vec<HostView>>, StatusCode> {
    let now = OffsetDateTime::now_utc();
    let hosts = app.monitor.store().list_hosts().map_err(internal)?;
    let views = hosts
        .into_iter()
        .map(|h| to_view(&app.monitor, h, now))
        .collect::<Result<Vec<_>, _>>()
        .map_err(internal)?;
    Ok(Json(views))
}

// GET /hosts/{id}
async fn get_host(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HostView>, StatusCode> {
    let host = app
        .monitor
        .store()
        .get_host(&id)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(to_view(&app.monitor, host, OffsetDateTime::now_utc()).map_err(internal)?))
}

// GET /outages?limit=N (plus récentes d'abord)
async fn get_outages(
    State(app): State<AppState>,
    Query(params): Query<OutagesParams>,
) -> Result<Json<Vec<OutageView>>, StatusCode> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_OUTAGES_LIMIT)
        .min(MAX_OUTAGES_LIMIT);
    let outages = app
        .monitor
        .reconciler()
        .ledger()
        .recent(limit)
        .map_err(internal)?;
    let names: HashMap<String, String> = app
        .monitor
        .store()
        .list_hosts()
        .map_err(internal)?
        .into_iter()
        .map(|h| (h.id, h.name))
        .collect();

    let views = outages
        .into_iter()
        .map(|o| OutageView {
            server_name: names.get(&o.host_id).cloned(),
            duration_seconds: o.duration().map(|d| d.whole_seconds()),
            outage: o,
        })
        .collect();
    Ok(Json(views))
}

fn internal(e: StoreError) -> StatusCode {
    error!("[http] store error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
