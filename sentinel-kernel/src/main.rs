/**
 * SENTINEL KERNEL - Point d'entrée principal du collecteur
 *
 * RÔLE : Bootstrap : config, store, monitor (sweep + reconciler + alertes),
 * event bus MQTT optionnel, API HTTP.
 *
 * ARCHITECTURE : heartbeats HTTP poussés par les agents + sweep périodique
 * qui détecte les silences. Les deux chemins passent par le même reconciler.
 */

use anyhow::Context;
use sentinel_kernel::config::load_config;
use sentinel_kernel::health::HealthTracker;
use sentinel_kernel::http::{build_router, AppState};
use sentinel_kernel::monitor::spawn_sweep_loop;
use sentinel_kernel::mqtt::EventBus;
use sentinel_kernel::notify::Dispatcher;
use sentinel_kernel::store::HostStore;
use sentinel_kernel::{JsonStore, Monitor};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    // store + hôtes déclarés
    let store = JsonStore::open(&cfg.data_dir)
        .with_context(|| format!("failed to open data dir {:?}", cfg.data_dir))?;
    let hosts = cfg.hosts();
    if hosts.is_empty() {
        warn!("[kernel] no hosts declared in config, every report will be rejected");
    }
    store.sync_hosts(hosts).context("failed to seed hosts")?;
    let store = Arc::new(store);

    // alertes : canal absent = dispatcher muet, le registre tourne quand même
    let dispatcher = Dispatcher::from_config(&cfg.telegram);
    if !dispatcher.is_enabled() {
        info!("[kernel] notification channel not configured, alerts disabled");
    }

    let mut monitor = Monitor::new(store, dispatcher);
    if let Some(mqtt) = &cfg.mqtt {
        info!("[kernel] publishing transitions to mqtt {}:{}", mqtt.host, mqtt.port);
        monitor = monitor.with_event_bus(EventBus::spawn(mqtt));
    }
    let monitor = Arc::new(monitor);

    // dead-man's switch
    spawn_sweep_loop(monitor.clone(), Duration::from_secs(cfg.sweep_interval_secs.max(1)));

    let api_key = std::env::var("SENTINEL_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("[kernel] SENTINEL_API_KEY not set, read API disabled");
    }

    let app_state = AppState {
        monitor,
        health_tracker: HealthTracker::new(),
        api_key,
    };
    let app = build_router(app_state);

    info!("[kernel] listening on http://{}", cfg.listen);
    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
